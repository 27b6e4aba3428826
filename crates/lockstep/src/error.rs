//! Dispatcher error types.

use thiserror::Error;

use crate::token::{DispatchToken, DispatcherId};

/// Errors surfaced by [`Dispatcher`](crate::Dispatcher).
///
/// Everything except [`DispatchError::Callback`] is a contract violation:
/// a programmer error that only surfaces while invariants are enforced.
/// All of them abort the current broadcast.
///
/// Each variant records the dispatcher that raised it, so an error that
/// escapes one dispatcher's callback into another is never mistaken for
/// the outer dispatcher's own.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invariant Violation: `{token}` does not map to a registered callback.")]
    UnknownToken {
        token: DispatchToken,
        dispatcher: DispatcherId,
    },

    #[error("Invariant Violation: Cannot dispatch in the middle of a dispatch.")]
    ReentrantDispatch { dispatcher: DispatcherId },

    #[error("Invariant Violation: wait_for must be invoked while dispatching.")]
    NotDispatching { dispatcher: DispatcherId },

    #[error("Invariant Violation: Circular dependency detected while waiting for `{token}`.")]
    CircularDependency {
        token: DispatchToken,
        dispatcher: DispatcherId,
    },

    #[error("Invariant Violation: Cannot {operation} in the middle of a dispatch.")]
    RegistryLocked {
        operation: &'static str,
        dispatcher: DispatcherId,
    },

    #[error("Callback `{token}` failed: {source}")]
    Callback {
        token: DispatchToken,
        dispatcher: DispatcherId,
        #[source]
        source: anyhow::Error,
    },
}

impl DispatchError {
    /// True for the programmer-error classes, false for callback failures.
    pub fn is_contract_violation(&self) -> bool {
        !matches!(self, DispatchError::Callback { .. })
    }

    /// The dispatcher that raised this error.
    pub fn dispatcher(&self) -> DispatcherId {
        match self {
            DispatchError::UnknownToken { dispatcher, .. }
            | DispatchError::ReentrantDispatch { dispatcher }
            | DispatchError::NotDispatching { dispatcher }
            | DispatchError::CircularDependency { dispatcher, .. }
            | DispatchError::RegistryLocked { dispatcher, .. }
            | DispatchError::Callback { dispatcher, .. } => *dispatcher,
        }
    }

    /// Attach a callback's error to its token.
    ///
    /// A `DispatchError` raised by the same dispatcher (a nested `wait_for`
    /// forwarded with `?`) passes through unchanged. Anything else, including
    /// errors from another dispatcher, is wrapped as this callback's failure.
    pub(crate) fn from_callback(
        dispatcher: DispatcherId,
        token: DispatchToken,
        err: anyhow::Error,
    ) -> Self {
        let ours = err
            .downcast_ref::<DispatchError>()
            .is_some_and(|inner| inner.dispatcher() == dispatcher);
        if !ours {
            return DispatchError::Callback {
                token,
                dispatcher,
                source: err,
            };
        }
        match err.downcast::<DispatchError>() {
            Ok(inner) => inner,
            Err(source) => DispatchError::Callback {
                token,
                dispatcher,
                source,
            },
        }
    }
}
