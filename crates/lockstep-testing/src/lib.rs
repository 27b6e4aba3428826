//! Testing utilities for lockstep dispatchers.
//!
//! - [`Recorder`] keeps an ordered log of callback invocations.
//! - [`TokenSlot`] lets a callback name a dependency that is registered later.
//!
//! ```ignore
//! let dispatcher = Dispatcher::enforced();
//! let recorder = Recorder::new();
//! let price = TokenSlot::new();
//!
//! dispatcher.register(recorder.waiting("city", &price))?;
//! price.fill(dispatcher.register(recorder.callback("price"))?);
//!
//! dispatcher.dispatch(())?;
//! assert_eq!(recorder.entries(), ["price", "city"]);
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use lockstep::{DispatchToken, Dispatcher};

/// Ordered log of callback invocations. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    entries: Rc<RefCell<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }

    /// How many times `entry` was recorded.
    pub fn count(&self, entry: &str) -> usize {
        self.entries.borrow().iter().filter(|e| *e == entry).count()
    }

    /// Position of the first `entry`, if recorded.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.borrow().iter().position(|e| e == entry)
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    /// A callback that records `name` on every payload.
    pub fn callback<P: 'static>(
        &self,
        name: &'static str,
    ) -> impl Fn(&P, &Dispatcher<P>) -> anyhow::Result<()> + 'static {
        let recorder = self.clone();
        move |_, _| {
            recorder.record(name);
            Ok(())
        }
    }

    /// A callback that waits for `dependency` and then records `name`.
    pub fn waiting<P: 'static>(
        &self,
        name: &'static str,
        dependency: &TokenSlot,
    ) -> impl Fn(&P, &Dispatcher<P>) -> anyhow::Result<()> + 'static {
        let recorder = self.clone();
        let dependency = dependency.clone();
        move |_, dispatcher| {
            dispatcher.wait_for(dependency.get())?;
            recorder.record(name);
            Ok(())
        }
    }
}

/// A token that is filled in after the callbacks referencing it are built.
#[derive(Debug, Clone, Default)]
pub struct TokenSlot {
    token: Rc<Cell<Option<DispatchToken>>>,
}

impl TokenSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fill(&self, token: DispatchToken) -> DispatchToken {
        self.token.set(Some(token));
        token
    }

    pub fn get(&self) -> Option<DispatchToken> {
        self.token.get()
    }
}

/// A dispatcher that enforces its contracts regardless of the environment.
pub fn enforced_dispatcher<P: 'static>() -> Dispatcher<P> {
    Dispatcher::enforced()
}
