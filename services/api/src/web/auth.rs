//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for user signup, login, and logout.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use mri_core::Identity;
use std::sync::Arc;
use tracing::info;

use crate::web::{
    middleware::expired_session_cookie,
    protocol::{AuthResponse, ErrorResponse, HttpError, LoginRequest, SignupRequest},
    state::{AppState, SessionHandle},
};

fn auth_response(identity: Option<&Identity>, stage: &str) -> Result<AuthResponse, HttpError> {
    let identity = identity.ok_or_else(|| {
        HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, "Session lost its identity")
    })?;
    Ok(AuthResponse {
        email: identity.email.clone(),
        name: identity.name.clone(),
        stage: stage.to_string(),
    })
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/signup - Create a new user account and sign in
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created and signed in", body = AuthResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
        (status = 422, description = "Invalid signup fields", body = ErrorResponse),
        (status = 503, description = "Database unavailable", body = ErrorResponse)
    )
)]
pub async fn signup_handler(
    Extension(handle): Extension<SessionHandle>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let mut session = handle.session.lock().await;
    let stage = session
        .signup(&req.name, &req.email, &req.password, &req.confirm_password)
        .await?;
    let response = auth_response(session.identity(), stage.as_str())?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /auth/login - Login with an existing account
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 409, description = "Already signed in", body = ErrorResponse),
        (status = 503, description = "Database unavailable", body = ErrorResponse)
    )
)]
pub async fn login_handler(
    Extension(handle): Extension<SessionHandle>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, HttpError> {
    let mut session = handle.session.lock().await;
    let stage = session.login(&req.email, &req.password).await?;
    Ok(Json(auth_response(session.identity(), stage.as_str())?))
}

/// POST /auth/logout - Sign out and discard the session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logout successful")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(handle): Extension<SessionHandle>,
) -> impl IntoResponse {
    handle.session.lock().await.sign_out();
    state.sessions.remove(handle.id).await;
    let active_sessions = state.sessions.len().await;
    info!(
        session_id = %handle.id,
        active_sessions,
        "Session closed"
    );
    (
        StatusCode::OK,
        [(header::SET_COOKIE, expired_session_cookie())],
    )
}

