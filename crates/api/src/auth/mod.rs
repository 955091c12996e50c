//! Bearer-token authentication for handlers.

pub mod jwt;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use lookout_core::{Error, Kind, UserId};

use crate::error::ApiError;
use crate::state::AppState;

/// Authenticated user extracted from the `Authorization: Bearer <token>`
/// header. Use as an extractor parameter in any handler that requires
/// authentication.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: UserId,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::new(Kind::Unauthorized, "missing Authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| Error::new(Kind::Unauthorized, "expected a Bearer token"))?;

        let user_id = state.verifier.verify(token)?;

        Ok(AuthUser { user_id })
    }
}
