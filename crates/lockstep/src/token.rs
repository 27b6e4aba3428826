//! Registration tokens.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Serialize, Serializer};

/// Process-wide so tokens from one dispatcher never alias another's.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);
static NEXT_DISPATCHER: AtomicU64 = AtomicU64::new(1);

/// Opaque handle returned by [`Dispatcher::register`](crate::Dispatcher::register).
///
/// A token is the only way to unregister a callback or to name it in
/// [`Dispatcher::wait_for`](crate::Dispatcher::wait_for). Tokens are never
/// reissued, so a stale token can't end up pointing at a later registration.
///
/// Tokens order by issue sequence, which is the registry's registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DispatchToken(u64);

impl DispatchToken {
    pub(crate) fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DispatchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID_{}", self.0)
    }
}

impl Serialize for DispatchToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Identifies the dispatcher instance that raised a [`DispatchError`](crate::DispatchError).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatcherId(u64);

impl DispatcherId {
    pub(crate) fn next() -> Self {
        Self(NEXT_DISPATCHER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DispatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dispatcher-{}", self.0)
    }
}
