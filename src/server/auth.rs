//! Caller identity.
//!
//! Authentication happens upstream; the trusted proxy forwards the
//! authenticated user id in [`OWNER_HEADER`].

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::error::ApiError;

pub const OWNER_HEADER: &str = "x-bmd-owner";

/// The authenticated owner of the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let owner = parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {} header", OWNER_HEADER)))?;

        Ok(Owner(owner.to_string()))
    }
}
