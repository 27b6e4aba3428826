//! Contract enforcement.
//!
//! The dispatcher routes every contract check through [`Enforcement::check`].
//! With enforcement off a violated check is skipped entirely, which leaves the
//! dispatcher's behavior undefined for that call. Production builds may
//! choose that trade; tests should always run with [`Enforcement::Enforce`].

use serde::Deserialize;

use crate::error::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enforcement {
    /// Violations fail with a typed [`DispatchError`].
    Enforce,
    /// Checks are not evaluated at all.
    Ignore,
}

impl Enforcement {
    /// Fail with `violation()` when `condition()` is false.
    ///
    /// In [`Enforcement::Ignore`] mode neither closure runs.
    pub fn check(
        self,
        condition: impl FnOnce() -> bool,
        violation: impl FnOnce() -> DispatchError,
    ) -> Result<(), DispatchError> {
        match self {
            Enforcement::Ignore => Ok(()),
            Enforcement::Enforce if condition() => Ok(()),
            Enforcement::Enforce => Err(violation()),
        }
    }

    pub fn is_enforced(self) -> bool {
        self == Enforcement::Enforce
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::DispatcherId;

    fn not_dispatching() -> DispatchError {
        DispatchError::NotDispatching {
            dispatcher: DispatcherId::next(),
        }
    }

    #[test]
    fn enforce_returns_violation_when_condition_fails() {
        let result = Enforcement::Enforce.check(|| false, not_dispatching);
        assert!(matches!(result, Err(DispatchError::NotDispatching { .. })));
    }

    #[test]
    fn enforce_passes_when_condition_holds() {
        assert!(Enforcement::Enforce.check(|| true, not_dispatching).is_ok());
    }

    #[test]
    fn ignore_never_evaluates_condition() {
        let result = Enforcement::Ignore.check(
            || panic!("condition evaluated"),
            || panic!("violation built"),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn only_enforce_is_enforced() {
        assert!(Enforcement::Enforce.is_enforced());
        assert!(!Enforcement::Ignore.is_enforced());
    }
}
