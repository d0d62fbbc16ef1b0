//! Explicit per-request context.
//!
//! The authenticated caller travels as a value through every signature that
//! needs it; nothing is stashed in task-local storage, so there is no
//! cleanup path to get wrong.

use axum::extract::FromRequestParts;
use axum::http::{StatusCode, request::Parts};

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: u64,
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .ok_or((
                StatusCode::UNAUTHORIZED,
                "missing or invalid x-user-id header",
            ))?;

        Ok(Self { user_id })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    async fn extract(request: Request<()>) -> Result<RequestContext, (StatusCode, &'static str)> {
        let (mut parts, _) = request.into_parts();
        RequestContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn context_reads_the_user_header() {
        let request = Request::builder()
            .header(USER_ID_HEADER, "42")
            .body(())
            .unwrap();

        let context = extract(request).await.unwrap();
        assert_eq!(context.user_id, 42);
    }

    #[tokio::test]
    async fn missing_or_garbled_header_is_rejected() {
        let bare = Request::builder().body(()).unwrap();
        assert!(extract(bare).await.is_err());

        let garbled = Request::builder()
            .header(USER_ID_HEADER, "not-a-number")
            .body(())
            .unwrap();
        let (status, _) = extract(garbled).await.unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
