//! Principal tokens.
//!
//! Every caller authenticates with an HS256-signed JWT carrying [`Claims`].
//! ENGINE tokens are minted when a worker claims a job: `sub` is the job id,
//! and the token carries the project and the queue claim token, so every
//! report the engine sends is bound to exactly one project and one claim.
//! WORKER tokens are minted here for worker processes. USER tokens come from
//! the platform's sign-in service, which signs with the same secret.

use flowline_core::types::{DbId, JobId};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who a token was issued to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrincipalType {
    /// A flow execution working on one claimed job.
    Engine,
    /// A worker process polling the queue.
    Worker,
    /// A signed-in user watching runs of a project.
    User,
}

/// JWT claims embedded in every principal token.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Subject: the job id for ENGINE, the worker or user id otherwise.
    pub sub: String,
    pub principal_type: PrincipalType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<DbId>,
    /// Claim token of the job an ENGINE principal works on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_token: Option<String>,
    /// Expiration time (UTC Unix timestamp).
    pub exp: i64,
    /// Issued-at time (UTC Unix timestamp).
    pub iat: i64,
    /// Unique token identifier (UUID v4).
    pub jti: String,
}

/// Configuration for token generation and validation.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HMAC-SHA256 secret used to sign and verify tokens.
    pub secret: String,
    /// Lifetime of engine tokens minted on claim (default: 60).
    pub engine_token_expiry_mins: i64,
}

/// Default engine token expiry in minutes.
const DEFAULT_ENGINE_EXPIRY_MINS: i64 = 60;

/// Worker tokens are long-lived deployment credentials.
const WORKER_TOKEN_EXPIRY_MINS: i64 = 60 * 24 * 365;

impl JwtConfig {
    /// Load JWT configuration from environment variables.
    ///
    /// | Env Var                    | Required | Default |
    /// |----------------------------|----------|---------|
    /// | `JWT_SECRET`               | **yes**  | --      |
    /// | `ENGINE_TOKEN_EXPIRY_MINS` | no       | `60`    |
    ///
    /// # Panics
    ///
    /// Panics if `JWT_SECRET` is not set or is empty.
    pub fn from_env() -> Self {
        let secret =
            std::env::var("JWT_SECRET").expect("JWT_SECRET must be set in the environment");
        assert!(!secret.is_empty(), "JWT_SECRET must not be empty");

        let engine_token_expiry_mins: i64 = std::env::var("ENGINE_TOKEN_EXPIRY_MINS")
            .unwrap_or_else(|_| DEFAULT_ENGINE_EXPIRY_MINS.to_string())
            .parse()
            .expect("ENGINE_TOKEN_EXPIRY_MINS must be a valid i64");

        Self {
            secret,
            engine_token_expiry_mins,
        }
    }
}

fn sign(
    sub: String,
    principal_type: PrincipalType,
    project_id: Option<DbId>,
    queue_token: Option<String>,
    expiry_mins: i64,
    config: &JwtConfig,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub,
        principal_type,
        project_id,
        queue_token,
        exp: now + expiry_mins * 60,
        iat: now,
        jti: Uuid::new_v4().to_string(),
    };

    encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
}

/// Mint the token an engine uses while executing one claimed job.
pub fn generate_engine_token(
    job_id: JobId,
    project_id: DbId,
    queue_token: &str,
    config: &JwtConfig,
) -> Result<String, jsonwebtoken::errors::Error> {
    sign(
        job_id.to_string(),
        PrincipalType::Engine,
        Some(project_id),
        Some(queue_token.to_string()),
        config.engine_token_expiry_mins,
        config,
    )
}

/// Issue the credential a worker process polls the queue with.
pub fn generate_worker_token(
    worker_id: &str,
    config: &JwtConfig,
) -> Result<String, jsonwebtoken::errors::Error> {
    sign(
        worker_id.to_string(),
        PrincipalType::Worker,
        None,
        None,
        WORKER_TOKEN_EXPIRY_MINS,
        config,
    )
}

/// Validate and decode a token, returning the embedded [`Claims`].
///
/// Validates the signature and expiration.
pub fn validate_token(
    token: &str,
    config: &JwtConfig,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &Validation::default(), // HS256, validates exp
    )?;
    Ok(token_data.claims)
}
