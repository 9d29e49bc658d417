//! services/api/src/web/middleware.rs
//!
//! Caller identification for protected routes.

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::debug;
use uuid::Uuid;

/// Header carrying the caller's user id. Authentication happens upstream.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Reads and validates the caller's user id from the request headers.
pub fn parse_user_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .filter(|id| !id.is_nil())
}

/// Middleware that extracts the user id and inserts it into request extensions.
///
/// A missing, malformed or nil id is rejected with 401 Unauthorized.
pub async fn require_user(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let Some(user_id) = parse_user_id(req.headers()) else {
        debug!(path = %req.uri().path(), "rejected request without a valid user id");
        return Err(StatusCode::UNAUTHORIZED);
    };
    req.extensions_mut().insert(user_id);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(USER_ID_HEADER, HeaderValue::from_str(value).expect("header value"));
        map
    }

    #[test]
    fn accepts_a_well_formed_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_user_id(&headers(&id.to_string())), Some(id));
    }

    #[test]
    fn rejects_missing_malformed_and_nil_ids() {
        assert_eq!(parse_user_id(&HeaderMap::new()), None);
        assert_eq!(parse_user_id(&headers("not-a-uuid")), None);
        assert_eq!(parse_user_id(&headers(&Uuid::nil().to_string())), None);
    }
}
