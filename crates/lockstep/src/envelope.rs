//! Tagged-source envelopes.
//!
//! Actions that come from the router or from views are wrapped as
//! `{ "source": ..., "action": ... }` before they are broadcast, so stores can
//! tell where an action came from. The tag carries no ordering semantics.

use serde::{Deserialize, Serialize};

use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;

/// Where an action originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionSource {
    /// Dispatched by the router or its action creators.
    Route,
    /// Dispatched by views or their action creators.
    View,
}

/// The payload shape broadcast by the tagged-source helpers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<A> {
    pub source: ActionSource,
    pub action: A,
}

impl<A> Envelope<A> {
    pub fn new(source: ActionSource, action: A) -> Self {
        Self { source, action }
    }
}

impl<A: 'static> Dispatcher<Envelope<A>> {
    /// Wrap `action` with `source` and broadcast it.
    pub fn dispatch_from(&self, source: ActionSource, action: A) -> Result<(), DispatchError> {
        self.dispatch(Envelope::new(source, action))
    }

    pub fn dispatch_route_action(&self, action: A) -> Result<(), DispatchError> {
        self.dispatch_from(ActionSource::Route, action)
    }

    pub fn dispatch_view_action(&self, action: A) -> Result<(), DispatchError> {
        self.dispatch_from(ActionSource::View, action)
    }
}
