//! JWT-based authentication extractor for Axum handlers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use flowline_core::error::CoreError;
use flowline_core::types::DbId;

use crate::auth::jwt::{validate_token, PrincipalType};
use crate::error::AppError;
use crate::state::AppState;

/// Authenticated caller extracted from a JWT Bearer token in the
/// `Authorization` header.
///
/// ```ignore
/// async fn my_handler(principal: Principal) -> AppResult<Json<()>> {
///     tracing::info!(principal_id = %principal.id, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Principal {
    /// Token subject (`claims.sub`).
    pub id: String,
    pub principal_type: PrincipalType,
    pub project_id: Option<DbId>,
    pub queue_token: Option<String>,
}

impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Core(CoreError::Unauthorized(
                    "Missing Authorization header".into(),
                ))
            })?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            AppError::Core(CoreError::Unauthorized(
                "Invalid Authorization format. Expected: Bearer <token>".into(),
            ))
        })?;

        let claims = validate_token(token, &state.config.jwt).map_err(|_| {
            AppError::Core(CoreError::Unauthorized("Invalid or expired token".into()))
        })?;

        Ok(Principal {
            id: claims.sub,
            principal_type: claims.principal_type,
            project_id: claims.project_id,
            queue_token: claims.queue_token,
        })
    }
}
