//! services/api/src/web/protocol.rs
//!
//! Request and response payloads for the HTTP API, plus the mapping from
//! session errors to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use mri_core::{
    AuthError, ClassLabel, InferenceError, PatientForm, Prediction, ScanRecord, SessionError,
    SessionOrchestrator, StoreError,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::{IntoParams, ToSchema};

//=========================================================================================
// Requests
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// The patient application form.
#[derive(Deserialize, ToSchema)]
pub struct SubmitRequest {
    pub name: String,
    pub age: i64,
    pub place: String,
    pub phone: String,
}

impl From<SubmitRequest> for PatientForm {
    fn from(req: SubmitRequest) -> Self {
        PatientForm {
            name: req.name,
            age: req.age,
            place: req.place,
            phone: req.phone,
        }
    }
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Include the base64 scan image in each record.
    #[serde(default)]
    pub include_images: bool,
}

//=========================================================================================
// Responses
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub email: String,
    pub name: String,
    pub stage: String,
}

#[derive(Serialize, ToSchema)]
pub struct ClassScore {
    pub label: String,
    pub percentage: f64,
}

#[derive(Serialize, ToSchema)]
pub struct PredictionResponse {
    pub label: String,
    pub code: String,
    pub confidence: f64,
    pub distribution: Vec<ClassScore>,
}

impl From<&Prediction> for PredictionResponse {
    fn from(prediction: &Prediction) -> Self {
        Self {
            label: prediction.label.display_name().to_string(),
            code: prediction.label.code().to_string(),
            confidence: prediction.confidence,
            distribution: ClassLabel::ALL
                .iter()
                .zip(prediction.distribution)
                .map(|(label, percentage)| ClassScore {
                    label: label.display_name().to_string(),
                    percentage,
                })
                .collect(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ScanRecordResponse {
    pub name: String,
    pub age: u32,
    pub place: String,
    pub phone_number: String,
    pub prediction: String,
    pub confidence: f64,
    pub image_base64: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl ScanRecordResponse {
    pub fn from_record(record: ScanRecord, include_image: bool) -> Self {
        Self {
            name: record.patient.name,
            age: record.patient.age,
            place: record.patient.place,
            phone_number: record.patient.phone,
            prediction: record.prediction.display_name().to_string(),
            confidence: record.confidence,
            image_base64: record.image_base64.filter(|_| include_image),
            submitted_at: record.submitted_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SessionResponse {
    pub stage: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub prediction: Option<PredictionResponse>,
    pub report_ready: bool,
}

impl From<&SessionOrchestrator> for SessionResponse {
    fn from(session: &SessionOrchestrator) -> Self {
        Self {
            stage: session.stage().as_str().to_string(),
            email: session.identity().map(|i| i.email.clone()),
            name: session.identity().map(|i| i.name.clone()),
            prediction: session.prediction().map(PredictionResponse::from),
            report_ready: session.has_report(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FieldErrorResponse {
    pub field: String,
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
    pub fields: Vec<FieldErrorResponse>,
}

//=========================================================================================
// Error Mapping
//=========================================================================================

/// An error ready to be sent to the client.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    message: String,
    fields: Vec<FieldErrorResponse>,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

pub fn status_for(error: &SessionError) -> StatusCode {
    match error {
        SessionError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::Auth(AuthError::Hashing(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        SessionError::Auth(_) => StatusCode::UNAUTHORIZED,
        SessionError::Codec(_) => StatusCode::BAD_REQUEST,
        SessionError::Inference(InferenceError::ModelUnavailable(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        SessionError::Inference(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::Store(StoreError::DuplicateUser(_)) => StatusCode::CONFLICT,
        SessionError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::Store(StoreError::Operation(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        SessionError::Report(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SessionError::InvalidTransition { .. } => StatusCode::CONFLICT,
    }
}

impl From<SessionError> for HttpError {
    fn from(error: SessionError) -> Self {
        let status = status_for(&error);
        if status.is_server_error() {
            error!("Request failed: {}", error);
        } else {
            warn!("Request rejected: {}", error);
        }
        let fields = match &error {
            SessionError::Validation(errors) => errors
                .fields()
                .iter()
                .map(|e| FieldErrorResponse {
                    field: e.field.to_string(),
                    message: e.message.clone(),
                })
                .collect(),
            _ => Vec::new(),
        };
        Self {
            status,
            message: error.user_message(),
            fields,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            message: self.message,
            fields: self.fields,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mri_core::{FieldError, Stage, ValidationErrors};

    #[test]
    fn errors_map_to_distinct_statuses() {
        let cases: Vec<(SessionError, StatusCode)> = vec![
            (
                ValidationErrors::single("phone", "must be exactly 10 digits").into(),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (AuthError::InvalidCredentials.into(), StatusCode::UNAUTHORIZED),
            (
                StoreError::DuplicateUser("a@x.com".into()).into(),
                StatusCode::CONFLICT,
            ),
            (
                StoreError::Unavailable("down".into()).into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                InferenceError::Execution("nan".into()).into(),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                SessionError::InvalidTransition {
                    stage: Stage::Anonymous,
                    action: "submit the form",
                },
                StatusCode::CONFLICT,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(HttpError::from(error).status(), status);
        }
    }

    #[test]
    fn validation_fields_are_reported() {
        let error = SessionError::from(ValidationErrors(vec![
            FieldError::new("name", "is required"),
            FieldError::new("age", "must not be negative"),
        ]));
        let http = HttpError::from(error);
        let fields: Vec<&str> = http.fields.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(fields, ["name", "age"]);
    }

    #[test]
    fn history_responses_omit_images_unless_asked() {
        let record = ScanRecord {
            user_email: "a@x.com".to_string(),
            patient: mri_core::PatientDetails {
                name: "A".to_string(),
                age: 70,
                place: "X".to_string(),
                phone: "1234567890".to_string(),
            },
            prediction: ClassLabel::Mci,
            confidence: 80.0,
            image_base64: Some("abc".to_string()),
            submitted_at: Utc::now(),
        };
        assert!(ScanRecordResponse::from_record(record.clone(), false)
            .image_base64
            .is_none());
        assert_eq!(
            ScanRecordResponse::from_record(record, true).image_base64.as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn error_body_carries_message_and_fields() {
        let http = HttpError::from(SessionError::from(ValidationErrors::single(
            "phone",
            "must be exactly 10 digits",
        )));
        let response = http.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = ErrorResponse {
            message: "Invalid input".to_string(),
            fields: vec![FieldErrorResponse {
                field: "phone".to_string(),
                message: "must be exactly 10 digits".to_string(),
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["fields"][0]["field"], "phone");
    }

    #[test]
    fn prediction_response_lists_every_class() {
        let prediction = Prediction {
            label: ClassLabel::LateMci,
            confidence: 61.5,
            distribution: [5.0, 10.0, 13.5, 61.5, 10.0],
        };
        let json = serde_json::to_value(PredictionResponse::from(&prediction)).unwrap();
        assert_eq!(json["code"], "LMCI");
        assert_eq!(json["label"], "Late MCI");
        assert_eq!(json["distribution"].as_array().map(Vec::len), Some(5));
        assert_eq!(json["distribution"][4]["label"], "Alzheimer's Disease");
    }
}
