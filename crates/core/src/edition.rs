//! Deployment tier and environment switches.

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Deployment tier. Only plan-bearing tiers enforce task quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Edition {
    #[default]
    Community,
    Cloud,
    Enterprise,
}

impl Edition {
    pub fn as_str(self) -> &'static str {
        match self {
            Edition::Community => "community",
            Edition::Cloud => "cloud",
            Edition::Enterprise => "enterprise",
        }
    }

    pub fn supports_plans(self) -> bool {
        !matches!(self, Edition::Community)
    }
}

impl fmt::Display for Edition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Edition {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "community" | "ce" => Ok(Edition::Community),
            "cloud" => Ok(Edition::Cloud),
            "enterprise" | "ee" => Ok(Edition::Enterprise),
            other => Err(CoreError::Validation(format!("Unknown edition '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Production,
    Development,
    /// Queue-level job reports are acknowledged without touching the queue.
    Testing,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Development => "development",
            Environment::Testing => "testing",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "development" | "dev" => Ok(Environment::Development),
            "testing" | "test" => Ok(Environment::Testing),
            other => Err(CoreError::Validation(format!(
                "Unknown environment '{other}'"
            ))),
        }
    }
}
