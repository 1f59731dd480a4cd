pub mod classifier;
pub mod db;
pub mod hasher;
pub mod retry;

pub use classifier::OnnxClassifier;
pub use db::{PgRecordStore, StoreSettings};
pub use hasher::Argon2Hasher;
pub use retry::RetryPolicy;
