use std::env;

use serde::Deserialize;

use crate::invariant::Enforcement;

/// Environment variable selecting the contract-enforcement mode.
pub const ENV_VAR: &str = "LOCKSTEP_ENV";

/// Dispatcher configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_enforcement")]
    pub enforcement: Enforcement,
}

impl DispatcherConfig {
    /// Load configuration from `LOCKSTEP_ENV`.
    ///
    /// `development` enforces contracts, any other value disables them.
    /// When unset, debug builds enforce and release builds don't.
    pub fn from_env() -> Self {
        Self {
            enforcement: enforcement_for(env::var(ENV_VAR).ok().as_deref()),
        }
    }

    pub fn enforced() -> Self {
        Self {
            enforcement: Enforcement::Enforce,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enforcement: default_enforcement(),
        }
    }
}

fn enforcement_for(env_value: Option<&str>) -> Enforcement {
    match env_value.map(str::trim) {
        None | Some("") => default_enforcement(),
        Some("development") => Enforcement::Enforce,
        Some(_) => Enforcement::Ignore,
    }
}

fn default_enforcement() -> Enforcement {
    if cfg!(debug_assertions) {
        Enforcement::Enforce
    } else {
        Enforcement::Ignore
    }
}
