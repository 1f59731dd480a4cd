//! crates/mri_core/src/error.rs
//!
//! The error taxonomy for the diagnostic pipeline. Each component reports its
//! own error type; `SessionError` is the boundary type the orchestrator returns
//! and knows how to turn into a message for the user.

use crate::session::Stage;

//=========================================================================================
// Validation and Authentication
//=========================================================================================

/// A single rejected input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Bad user input. Always carries at least one field error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid input: {}", describe_fields(.0))]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        Self(vec![FieldError::new(field, message)])
    }

    pub fn fields(&self) -> &[FieldError] {
        &self.0
    }

    /// Whether any error was reported for `field`.
    pub fn mentions(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }
}

fn describe_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("You need to be signed in to do that")]
    NotSignedIn,
    #[error("Credential hashing failed: {0}")]
    Hashing(String),
}

//=========================================================================================
// Classification Path
//=========================================================================================

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Image text is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Image could not be processed: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InferenceError {
    /// The image could not be converted into a model input.
    #[error("Image could not be prepared for classification: {0}")]
    Input(String),
    /// The forward pass failed or produced an unusable output.
    #[error("Classification failed: {0}")]
    Execution(String),
    /// The model never loaded. Permanent for the life of the process.
    #[error("Classification model is unavailable: {0}")]
    ModelUnavailable(String),
}

//=========================================================================================
// Persistence
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The connection is down. Possibly transient.
    #[error("Record store is unavailable: {0}")]
    Unavailable(String),
    /// Any other persistence failure, e.g. a malformed row.
    #[error("Record store operation failed: {0}")]
    Operation(String),
    #[error("An account with email {0} already exists")]
    DuplicateUser(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// A convenience type alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

//=========================================================================================
// Reporting
//=========================================================================================

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Embedded image could not be decoded: {0}")]
    Image(#[from] CodecError),
    #[error("Report document could not be written: {0}")]
    Document(String),
}

//=========================================================================================
// Orchestrator Boundary
//=========================================================================================

/// Everything a session transition can fail with.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("Cannot {action} while the session is in the {stage:?} stage")]
    InvalidTransition { stage: Stage, action: &'static str },
}

impl SessionError {
    /// A message suitable for showing to the person using the application.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Validation(e) => e.to_string(),
            SessionError::Auth(AuthError::Hashing(_)) => {
                "We could not process your credentials. Please try again.".to_string()
            }
            SessionError::Auth(e) => e.to_string(),
            SessionError::Codec(_) => {
                "The uploaded file is not a readable image. Please upload a JPG or PNG scan."
                    .to_string()
            }
            SessionError::Inference(InferenceError::ModelUnavailable(_)) => {
                "The diagnostic model is unavailable. Please contact the administrator.".to_string()
            }
            SessionError::Inference(_) => {
                "The image could not be classified. Please try another scan.".to_string()
            }
            SessionError::Store(StoreError::DuplicateUser(_)) => {
                "An account with this email already exists.".to_string()
            }
            SessionError::Store(StoreError::Unavailable(_)) => {
                "The database is temporarily unavailable. Please try again shortly.".to_string()
            }
            SessionError::Store(StoreError::Operation(_)) => {
                "Your data could not be saved or loaded. Please try again.".to_string()
            }
            SessionError::Report(_) => {
                "The report could not be generated. Your record has been saved.".to_string()
            }
            SessionError::InvalidTransition { action, .. } => {
                format!("You cannot {} right now.", action)
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Store(e) if e.is_transient())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_list_every_field() {
        let err = ValidationErrors(vec![
            FieldError::new("name", "is required"),
            FieldError::new("phone", "must be exactly 10 digits"),
        ]);
        assert!(err.mentions("phone"));
        assert!(!err.mentions("age"));
        assert_eq!(
            err.to_string(),
            "Invalid input: name: is required; phone: must be exactly 10 digits"
        );
    }

    #[test]
    fn only_unavailable_store_errors_are_transient() {
        assert!(SessionError::from(StoreError::Unavailable("down".into())).is_transient());
        assert!(!SessionError::from(StoreError::Operation("bad row".into())).is_transient());
        assert!(!SessionError::from(AuthError::InvalidCredentials).is_transient());
    }

    #[test]
    fn user_messages_hide_internal_detail() {
        let err = SessionError::from(StoreError::Unavailable("tcp reset by 10.0.0.4".into()));
        assert!(!err.user_message().contains("10.0.0.4"));
    }
}
