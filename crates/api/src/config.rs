use std::str::FromStr;
use std::time::Duration;

use flowline_core::edition::{Edition, Environment};

use crate::auth::jwt::JwtConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development except the JWT
/// secret. In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `60`).
    pub request_timeout_secs: u64,
    /// Upper bound for draining background tasks on shutdown (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// JWT signing configuration for engine, worker and user principals.
    pub jwt: JwtConfig,
    /// Deployment tier; plan-bearing tiers enforce task quotas.
    pub edition: Edition,
    pub environment: Environment,
    /// Postgres backends when set, in-memory backends otherwise.
    pub database_url: Option<String>,
    /// How long a synchronous webhook caller waits for its reply (default: `30`).
    pub webhook_timeout_secs: u64,
    /// A RUNNING job claimed longer ago than this is redelivered (default: `600`).
    pub claim_timeout_secs: u64,
    /// Claim expiry sweep interval (default: `15`).
    pub sweep_interval_secs: u64,
    /// Upper bound of a worker long-poll (default: `10`).
    pub poll_timeout_secs: u64,
    /// Disable a flow after this many consecutive trigger failures.
    pub max_consecutive_trigger_failures: Option<i32>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                            | Default                 |
    /// |------------------------------------|-------------------------|
    /// | `HOST`                             | `0.0.0.0`               |
    /// | `PORT`                             | `3000`                  |
    /// | `CORS_ORIGINS`                     | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`             | `60`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`            | `30`                    |
    /// | `EDITION`                          | `community`             |
    /// | `ENVIRONMENT`                      | `production`            |
    /// | `DATABASE_URL`                     | unset (in-memory)       |
    /// | `WEBHOOK_TIMEOUT_SECS`             | `30`                    |
    /// | `CLAIM_TIMEOUT_SECS`               | `600`                   |
    /// | `SWEEP_INTERVAL_SECS`              | `15`                    |
    /// | `POLL_TIMEOUT_SECS`                | `10`                    |
    /// | `MAX_CONSECUTIVE_TRIGGER_FAILURES` | unset (never disable)   |
    ///
    /// # Panics
    ///
    /// Panics on any value that does not parse, and when `JWT_SECRET` is
    /// missing (see [`JwtConfig::from_env`]).
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.is_empty());

        let max_consecutive_trigger_failures = std::env::var("MAX_CONSECUTIVE_TRIGGER_FAILURES")
            .ok()
            .map(|raw| {
                raw.parse()
                    .expect("MAX_CONSECUTIVE_TRIGGER_FAILURES must be a valid i32")
            });

        Self {
            host,
            port: env_or("PORT", 3000),
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 60),
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", 30),
            jwt: JwtConfig::from_env(),
            edition: env_or("EDITION", Edition::Community),
            environment: env_or("ENVIRONMENT", Environment::Production),
            database_url,
            webhook_timeout_secs: env_or("WEBHOOK_TIMEOUT_SECS", 30),
            claim_timeout_secs: env_or("CLAIM_TIMEOUT_SECS", 600),
            sweep_interval_secs: env_or("SWEEP_INTERVAL_SECS", 15),
            poll_timeout_secs: env_or("POLL_TIMEOUT_SECS", 10),
            max_consecutive_trigger_failures,
        }
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_secs(self.claim_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

/// Parse `key` from the environment, falling back to `default` when unset.
///
/// Panics when the variable is set but does not parse.
fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{key} has an invalid value '{raw}': {e}")),
        Err(_) => default,
    }
}
