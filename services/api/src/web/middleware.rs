//! services/api/src/web/middleware.rs
//!
//! Session middleware: attaches the caller's `SessionOrchestrator` to every request.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::web::state::AppState;

pub const SESSION_COOKIE: &str = "mri_session";

/// Middleware that resolves the session cookie to a live session.
///
/// Unknown or missing cookies get a fresh anonymous session, and the new cookie
/// is set on the response. The handle is inserted into request extensions for
/// handlers to use.
pub async fn attach_session(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    // 1. Parse session ID from cookie
    let existing = session_id_from_headers(req.headers());

    // 2. Find or create the session
    let (handle, created) = state.sessions.resolve(existing, &state.services).await;
    let id = handle.id;
    if created {
        debug!(session_id = %id, "Started new session");
    }

    // 3. Insert the handle into request extensions and continue to the handler
    req.extensions_mut().insert(handle);
    let mut response = next.run(req).await;

    // 4. Hand the cookie to new clients
    if created {
        match HeaderValue::from_str(&session_cookie(id)) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => error!("Failed to build session cookie: {:?}", e),
        }
    }
    response
}

/// Extracts the session ID from the `Cookie` header, if present and well-formed.
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|c| c.trim().strip_prefix(SESSION_COOKIE)?.strip_prefix('='))
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
}

pub fn session_cookie(id: Uuid) -> String {
    format!("{}={}; HttpOnly; SameSite=Lax; Path=/", SESSION_COOKIE, id)
}

pub fn expired_session_cookie() -> String {
    format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", SESSION_COOKIE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    #[test]
    fn finds_session_among_other_cookies() {
        let id = Uuid::new_v4();
        let found = session_id_from_headers(&headers(&format!("theme=dark; {}={}", SESSION_COOKIE, id)));
        assert_eq!(found, Some(id));
    }

    #[test]
    fn ignores_malformed_or_similar_cookies() {
        assert_eq!(session_id_from_headers(&headers("mri_session=not-a-uuid")), None);
        assert_eq!(
            session_id_from_headers(&headers(&format!("mri_session_old={}", Uuid::new_v4()))),
            None
        );
        assert_eq!(session_id_from_headers(&HeaderMap::new()), None);
    }

    #[test]
    fn cookie_round_trips() {
        let id = Uuid::new_v4();
        let cookie = session_cookie(id);
        let value = cookie.split(';').next().unwrap();
        assert_eq!(session_id_from_headers(&headers(value)), Some(id));
    }
}
