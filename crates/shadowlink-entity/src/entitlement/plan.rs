//! Plan enumeration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two offered access plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "plan_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    /// Recurring access, renewed per billing period.
    Monthly,
    /// One-time purchase, never self-expires.
    Lifetime,
}

impl Plan {
    /// Whether this plan never expires on its own.
    pub fn is_lifetime(&self) -> bool {
        matches!(self, Self::Lifetime)
    }

    /// Return the plan as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Lifetime => "lifetime",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Plan {
    type Err = shadowlink_core::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "monthly" => Ok(Self::Monthly),
            "lifetime" => Ok(Self::Lifetime),
            _ => Err(shadowlink_core::AppError::validation(format!(
                "Unknown plan: '{s}'. Expected one of: monthly, lifetime"
            ))),
        }
    }
}
