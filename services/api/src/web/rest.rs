//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the scan workflow and the master definition
//! for the OpenAPI specification.

use axum::{
    extract::{Multipart, Query},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    Extension,
};
use mri_core::{PatientForm, SessionError, ValidationErrors};
use tracing::{debug, warn};
use utoipa::OpenApi;

use crate::web::{
    protocol::{
        AuthResponse, ClassScore, ErrorResponse, FieldErrorResponse, HistoryQuery, HttpError,
        LoginRequest, PredictionResponse, ScanRecordResponse, SessionResponse, SignupRequest,
        SubmitRequest,
    },
    state::SessionHandle,
};

/// Multipart part that carries the scan.
pub const IMAGE_FIELD: &str = "image";

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::web::auth::signup_handler,
        crate::web::auth::login_handler,
        crate::web::auth::logout_handler,
        session_handler,
        upload_handler,
        open_form_handler,
        submit_handler,
        generate_report_handler,
        download_report_handler,
        history_handler,
    ),
    components(
        schemas(
            SignupRequest,
            LoginRequest,
            AuthResponse,
            SubmitRequest,
            PredictionResponse,
            ClassScore,
            ScanRecordResponse,
            SessionResponse,
            ErrorResponse,
            FieldErrorResponse
        )
    ),
    tags(
        (name = "Alzheimer MRI API", description = "Sign in, classify an MRI scan, save it with patient details and download a PDF report.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Describe the caller's session.
#[utoipa::path(
    get,
    path = "/session",
    responses(
        (status = 200, description = "Current session state", body = SessionResponse)
    )
)]
pub async fn session_handler(Extension(handle): Extension<SessionHandle>) -> Json<SessionResponse> {
    let session = handle.session.lock().await;
    Json(SessionResponse::from(&*session))
}

/// Upload an MRI scan and classify it.
///
/// Accepts a multipart/form-data request with an `image` part (JPG or PNG).
/// A new upload replaces any previous scan in the session.
#[utoipa::path(
    post,
    path = "/scans/upload",
    request_body(content_type = "multipart/form-data", description = "The MRI scan to classify."),
    responses(
        (status = 200, description = "Scan classified", body = PredictionResponse),
        (status = 400, description = "The file is not a readable image", body = ErrorResponse),
        (status = 409, description = "Not signed in", body = ErrorResponse),
        (status = 422, description = "Missing image or classification failed", body = ErrorResponse),
        (status = 503, description = "Model unavailable", body = ErrorResponse)
    )
)]
pub async fn upload_handler(
    Extension(handle): Extension<SessionHandle>,
    mut multipart: Multipart,
) -> Result<Json<PredictionResponse>, HttpError> {
    let mut image = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        HttpError::new(
            StatusCode::BAD_REQUEST,
            format!("Failed to read multipart data: {}", e),
        )
    })? {
        if field.name() != Some(IMAGE_FIELD) && field.file_name().is_none() {
            continue;
        }
        debug!(file_name = ?field.file_name(), "Receiving scan upload");
        let data = field.bytes().await.map_err(|e| {
            HttpError::new(
                StatusCode::BAD_REQUEST,
                format!("Failed to read file bytes: {}", e),
            )
        })?;
        image = Some(data);
        break;
    }

    let image = image
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| SessionError::from(ValidationErrors::single(IMAGE_FIELD, "is required")))?;

    let mut session = handle.session.lock().await;
    let prediction = session.upload_image(&image).await?;
    Ok(Json(PredictionResponse::from(&prediction)))
}

/// Open the patient application form for the classified scan.
#[utoipa::path(
    post,
    path = "/scans/form",
    responses(
        (status = 200, description = "Form is open", body = SessionResponse),
        (status = 409, description = "No classified scan", body = ErrorResponse)
    )
)]
pub async fn open_form_handler(
    Extension(handle): Extension<SessionHandle>,
) -> Result<Json<SessionResponse>, HttpError> {
    let mut session = handle.session.lock().await;
    session.open_form()?;
    Ok(Json(SessionResponse::from(&*session)))
}

/// Submit the patient form and save the scan record.
///
/// Submitting again after success returns the stored record without saving a
/// second one.
#[utoipa::path(
    post,
    path = "/scans/submit",
    request_body = SubmitRequest,
    responses(
        (status = 200, description = "Record saved", body = ScanRecordResponse),
        (status = 409, description = "Form is not open", body = ErrorResponse),
        (status = 422, description = "Invalid form fields", body = ErrorResponse),
        (status = 503, description = "Database unavailable", body = ErrorResponse)
    )
)]
pub async fn submit_handler(
    Extension(handle): Extension<SessionHandle>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<ScanRecordResponse>, HttpError> {
    let form = PatientForm::from(req);
    let mut session = handle.session.lock().await;
    let record = session.submit(&form).await?;
    Ok(Json(ScanRecordResponse::from_record(record, false)))
}

/// Generate the PDF report for the submitted record.
#[utoipa::path(
    post,
    path = "/scans/report",
    responses(
        (status = 200, description = "Report is ready for download", body = SessionResponse),
        (status = 409, description = "Nothing submitted yet", body = ErrorResponse),
        (status = 500, description = "Report could not be rendered", body = ErrorResponse)
    )
)]
pub async fn generate_report_handler(
    Extension(handle): Extension<SessionHandle>,
) -> Result<Json<SessionResponse>, HttpError> {
    let mut session = handle.session.lock().await;
    session.generate_report()?;
    Ok(Json(SessionResponse::from(&*session)))
}

/// Download the generated report. Each report can be downloaded once.
#[utoipa::path(
    get,
    path = "/scans/report",
    responses(
        (status = 200, description = "The PDF report", body = Vec<u8>, content_type = "application/pdf"),
        (status = 404, description = "No report is waiting", body = ErrorResponse)
    )
)]
pub async fn download_report_handler(
    Extension(handle): Extension<SessionHandle>,
) -> Result<impl IntoResponse, HttpError> {
    let report = handle.session.lock().await.take_report().ok_or_else(|| {
        warn!(session_id = %handle.id, "Report requested but none is waiting");
        HttpError::new(
            StatusCode::NOT_FOUND,
            "No report is available. Generate one first.",
        )
    })?;

    let disposition = format!("attachment; filename=\"{}\"", report.filename);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        report.bytes,
    ))
}

/// List the signed-in user's scan records, newest first.
#[utoipa::path(
    get,
    path = "/scans/history",
    params(HistoryQuery),
    responses(
        (status = 200, description = "The user's records", body = [ScanRecordResponse]),
        (status = 401, description = "Not signed in", body = ErrorResponse),
        (status = 503, description = "Database unavailable", body = ErrorResponse)
    )
)]
pub async fn history_handler(
    Extension(handle): Extension<SessionHandle>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ScanRecordResponse>>, HttpError> {
    let records = handle.session.lock().await.history().await?;
    Ok(Json(
        records
            .into_iter()
            .map(|record| ScanRecordResponse::from_record(record, query.include_images))
            .collect(),
    ))
}
