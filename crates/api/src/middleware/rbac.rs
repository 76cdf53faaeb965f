//! Principal-type access control extractors.
//!
//! Each extractor wraps [`Principal`] and rejects requests from the wrong
//! kind of caller with 403 Forbidden.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use flowline_core::error::CoreError;
use flowline_core::types::{DbId, JobId};

use super::auth::Principal;
use crate::auth::jwt::PrincipalType;
use crate::error::AppError;
use crate::state::AppState;

/// An engine working on one claimed job of one project.
#[derive(Debug, Clone)]
pub struct EnginePrincipal {
    pub job_id: JobId,
    pub project_id: DbId,
    pub queue_token: String,
}

/// Requires an ENGINE principal. Rejects with 403 Forbidden otherwise.
///
/// ```ignore
/// async fn engine_only(RequireEngine(engine): RequireEngine) -> AppResult<Json<()>> {
///     // every lookup below is scoped to engine.project_id
///     Ok(Json(()))
/// }
/// ```
pub struct RequireEngine(pub EnginePrincipal);

impl FromRequestParts<AppState> for RequireEngine {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let principal = Principal::from_request_parts(parts, state).await?;
        if principal.principal_type != PrincipalType::Engine {
            return Err(AppError::Core(CoreError::Forbidden(
                "Engine principal required".into(),
            )));
        }

        let malformed =
            || AppError::Core(CoreError::Unauthorized("Malformed engine token".into()));
        let job_id = principal.id.parse().map_err(|_| malformed())?;
        let project_id = principal.project_id.ok_or_else(malformed)?;
        let queue_token = principal.queue_token.ok_or_else(malformed)?;

        Ok(RequireEngine(EnginePrincipal {
            job_id,
            project_id,
            queue_token,
        }))
    }
}

/// Requires a WORKER principal. Rejects with 403 Forbidden otherwise.
pub struct RequireWorker(pub Principal);

impl FromRequestParts<AppState> for RequireWorker {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let principal = Principal::from_request_parts(parts, state).await?;
        if principal.principal_type != PrincipalType::Worker {
            return Err(AppError::Core(CoreError::Forbidden(
                "Worker principal required".into(),
            )));
        }
        Ok(RequireWorker(principal))
    }
}
