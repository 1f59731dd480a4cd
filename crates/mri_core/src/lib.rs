pub mod classification;
pub mod codec;
pub mod domain;
pub mod error;
pub mod ports;
pub mod report;
pub mod session;
pub mod validation;

pub use domain::{ClassLabel, PatientDetails, Prediction, ScanRecord, UserCredentials};
pub use error::{
    AuthError, CodecError, FieldError, InferenceError, ReportError, SessionError, StoreError,
    StoreResult, ValidationErrors,
};
pub use ports::{Classifier, CredentialHasher, RecordStore};
pub use report::ReportArtifact;
pub use session::{Identity, Services, SessionOrchestrator, Stage};
pub use validation::PatientForm;
