//! crates/mri_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the database, the inference runtime and the password hasher.

use async_trait::async_trait;
use image::DynamicImage;

use crate::domain::{Prediction, ScanRecord, UserCredentials};
use crate::error::{AuthError, InferenceError, StoreResult};

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Persistence for users and scan records.
///
/// Implementations are shared process-wide, so every method must be safe to
/// interleave with concurrent calls from other sessions.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // --- Users ---

    /// Inserts a user. Fails with `StoreError::DuplicateUser` when the email is
    /// taken; the uniqueness check and the insert must be a single atomic step.
    async fn create_user(&self, email: &str, name: &str, password_hash: &str) -> StoreResult<()>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserCredentials>>;

    // --- Scan Records (append-only) ---

    async fn append_scan_record(&self, record: &ScanRecord) -> StoreResult<()>;

    /// Records owned by `email`, newest first. Empty when there are none.
    async fn list_scan_records(&self, email: &str) -> StoreResult<Vec<ScanRecord>>;
}

/// A loaded image classifier.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, image: &DynamicImage) -> Result<Prediction, InferenceError>;
}

/// Password hashing and verification.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, AuthError>;

    /// Returns `Ok(false)` for a wrong password; errors only when `stored` is unusable.
    fn verify(&self, password: &str, stored: &str) -> Result<bool, AuthError>;
}
