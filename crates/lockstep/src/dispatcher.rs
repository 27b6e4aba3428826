//! The broadcast loop and `wait_for` ordering.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::{debug, debug_span, trace, warn};

use crate::config::DispatcherConfig;
use crate::error::DispatchError;
use crate::invariant::Enforcement;
use crate::token::{DispatchToken, DispatcherId};

/// Something that receives every dispatched payload.
///
/// Implemented for any `Fn(&P, &Dispatcher<P>) -> anyhow::Result<()>`, so
/// plain closures work. The dispatcher argument is how a callback reaches
/// [`Dispatcher::wait_for`].
pub trait Callback<P> {
    fn handle(&self, payload: &P, dispatcher: &Dispatcher<P>) -> anyhow::Result<()>;
}

impl<P, F> Callback<P> for F
where
    F: Fn(&P, &Dispatcher<P>) -> anyhow::Result<()>,
{
    fn handle(&self, payload: &P, dispatcher: &Dispatcher<P>) -> anyhow::Result<()> {
        self(payload, dispatcher)
    }
}

/// Where a callback stands in the current (or most recent) broadcast.
///
/// `Handled` implies the callback was pending first, so a single state
/// replaces separate pending/handled flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackState {
    /// Not yet invoked in this broadcast.
    Idle,
    /// Invocation started and has not returned. While a broadcast is
    /// running this means the callback is on the call stack.
    Pending,
    /// Invocation returned normally.
    Handled,
}

impl CallbackState {
    pub fn is_pending(self) -> bool {
        self != CallbackState::Idle
    }

    pub fn is_handled(self) -> bool {
        self == CallbackState::Handled
    }
}

type Tokens = SmallVec<[DispatchToken; 8]>;

/// Broadcasts every payload to every registered callback.
///
/// Unlike a topic-based pub/sub, callbacks don't subscribe to anything:
/// each dispatch reaches the whole registry, in registration order. A
/// callback that depends on another one's effects calls
/// [`wait_for`](Self::wait_for) with that callback's token, which runs the
/// dependency to completion first.
///
/// Dispatching is synchronous and never nests. The dispatcher is
/// single-threaded; no registry borrow is held while a callback runs, so
/// callbacks are free to call back into it.
pub struct Dispatcher<P> {
    callbacks: RefCell<BTreeMap<DispatchToken, Rc<dyn Callback<P>>>>,
    states: RefCell<HashMap<DispatchToken, CallbackState>>,
    pending_payload: RefCell<Option<Rc<P>>>,
    dispatching: Cell<bool>,
    enforcement: Enforcement,
    id: DispatcherId,
}

impl<P: 'static> Dispatcher<P> {
    /// Create a dispatcher configured from the environment.
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::from_env())
    }

    /// Create a dispatcher that always enforces its contracts.
    pub fn enforced() -> Self {
        Self::with_config(DispatcherConfig::enforced())
    }

    pub fn with_config(config: DispatcherConfig) -> Self {
        Self {
            callbacks: RefCell::new(BTreeMap::new()),
            states: RefCell::new(HashMap::new()),
            pending_payload: RefCell::new(None),
            dispatching: Cell::new(false),
            enforcement: config.enforcement,
            id: DispatcherId::next(),
        }
    }

    pub fn enforcement(&self) -> Enforcement {
        self.enforcement
    }

    /// Tag carried by every error this dispatcher raises.
    pub fn id(&self) -> DispatcherId {
        self.id
    }

    /// Register a closure to be invoked with every dispatched payload.
    ///
    /// Returns the token used with [`unregister`](Self::unregister) and
    /// [`wait_for`](Self::wait_for).
    pub fn register<F>(&self, callback: F) -> Result<DispatchToken, DispatchError>
    where
        F: Fn(&P, &Dispatcher<P>) -> anyhow::Result<()> + 'static,
    {
        self.register_callback(callback)
    }

    /// Register any [`Callback`] implementation.
    pub fn register_callback<C>(&self, callback: C) -> Result<DispatchToken, DispatchError>
    where
        C: Callback<P> + 'static,
    {
        self.enforcement.check(
            || !self.dispatching.get(),
            || DispatchError::RegistryLocked {
                operation: "register",
                dispatcher: self.id,
            },
        )?;

        let token = DispatchToken::next();
        self.callbacks.borrow_mut().insert(token, Rc::new(callback));
        debug!(%token, "callback registered");
        Ok(token)
    }

    /// Remove the callback registered under `token`.
    pub fn unregister(&self, token: DispatchToken) -> Result<(), DispatchError> {
        self.enforcement.check(
            || !self.dispatching.get(),
            || DispatchError::RegistryLocked {
                operation: "unregister",
                dispatcher: self.id,
            },
        )?;
        self.enforcement.check(
            || self.callbacks.borrow().contains_key(&token),
            || DispatchError::UnknownToken {
                token,
                dispatcher: self.id,
            },
        )?;

        if self.callbacks.borrow_mut().remove(&token).is_some() {
            debug!(%token, "callback unregistered");
        }
        Ok(())
    }

    /// Broadcast `payload` to every registered callback.
    ///
    /// Callbacks run in registration order unless `wait_for` pulls one
    /// forward. The first error aborts the broadcast; dispatch state is torn
    /// down on every exit path, so the dispatcher stays usable.
    pub fn dispatch(&self, payload: P) -> Result<(), DispatchError> {
        self.enforcement.check(
            || !self.dispatching.get(),
            || DispatchError::ReentrantDispatch {
                dispatcher: self.id,
            },
        )?;

        let tokens = self.start_dispatching(payload);
        let span = debug_span!("dispatch", callbacks = tokens.len());
        let _enter = span.enter();

        let _guard = StopDispatching(self);
        for token in tokens {
            if self.state_of(token).is_pending() {
                continue;
            }
            // Removed mid-broadcast; only reachable with enforcement off.
            if !self.is_registered(token) {
                continue;
            }
            self.invoke(token).inspect_err(|err| {
                warn!(%token, error = %err, "dispatch aborted");
            })?;
        }

        debug!("dispatch complete");
        Ok(())
    }

    /// Run the callbacks for `tokens` to completion before continuing.
    ///
    /// Only valid from inside a callback during a dispatch. Tokens already
    /// handled in this broadcast are skipped. Waiting on a callback that is
    /// still on the call stack is a circular dependency.
    pub fn wait_for<I>(&self, tokens: I) -> Result<(), DispatchError>
    where
        I: IntoIterator<Item = DispatchToken>,
    {
        self.enforcement.check(
            || self.dispatching.get(),
            || DispatchError::NotDispatching {
                dispatcher: self.id,
            },
        )?;

        for token in tokens {
            let state = self.state_of(token);
            if state.is_pending() {
                self.enforcement.check(
                    || state.is_handled(),
                    || DispatchError::CircularDependency {
                        token,
                        dispatcher: self.id,
                    },
                )?;
                trace!(%token, "dependency already satisfied");
                continue;
            }

            self.enforcement.check(
                || self.is_registered(token),
                || DispatchError::UnknownToken {
                    token,
                    dispatcher: self.id,
                },
            )?;
            trace!(%token, "waiting for dependency");
            self.invoke(token)?;
        }
        Ok(())
    }

    /// True while a dispatch is in progress, including nested `wait_for` calls.
    pub fn is_dispatching(&self) -> bool {
        self.dispatching.get()
    }

    /// State of `token` in the current or most recent broadcast.
    ///
    /// Kept after a dispatch ends (including an aborted one) and reset when
    /// the next one starts. `None` if `token` wasn't registered when the
    /// last broadcast began.
    pub fn callback_state(&self, token: DispatchToken) -> Option<CallbackState> {
        self.states.borrow().get(&token).copied()
    }

    pub fn is_registered(&self, token: DispatchToken) -> bool {
        self.callbacks.borrow().contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.callbacks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.borrow().is_empty()
    }

    fn invoke(&self, token: DispatchToken) -> Result<(), DispatchError> {
        let callback = self
            .callbacks
            .borrow()
            .get(&token)
            .cloned()
            .ok_or(DispatchError::UnknownToken {
                token,
                dispatcher: self.id,
            })?;

        let Some(payload) = self.pending_payload.borrow().clone() else {
            // No broadcast in flight: a nested dispatch tore it down, or
            // wait_for ran outside a dispatch. The state is left untouched.
            warn!(%token, "no payload in flight, skipping callback");
            return Ok(());
        };

        self.states.borrow_mut().insert(token, CallbackState::Pending);

        trace!(%token, "invoking callback");
        callback
            .handle(&payload, self)
            .map_err(|err| DispatchError::from_callback(self.id, token, err))?;

        self.states.borrow_mut().insert(token, CallbackState::Handled);
        Ok(())
    }

    fn state_of(&self, token: DispatchToken) -> CallbackState {
        self.callback_state(token).unwrap_or(CallbackState::Idle)
    }

    fn start_dispatching(&self, payload: P) -> Tokens {
        let tokens: Tokens = self.callbacks.borrow().keys().copied().collect();
        {
            let mut states = self.states.borrow_mut();
            states.clear();
            states.extend(tokens.iter().map(|&token| (token, CallbackState::Idle)));
        }
        *self.pending_payload.borrow_mut() = Some(Rc::new(payload));
        self.dispatching.set(true);
        tokens
    }

    fn stop_dispatching(&self) {
        self.pending_payload.borrow_mut().take();
        self.dispatching.set(false);
    }
}

impl<P: 'static> Default for Dispatcher<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> std::fmt::Debug for Dispatcher<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("callbacks", &self.callbacks.borrow().len())
            .field("dispatching", &self.dispatching.get())
            .field("enforcement", &self.enforcement)
            .field("id", &self.id)
            .finish()
    }
}

/// Tears dispatch state down when the broadcast loop exits, however it exits.
struct StopDispatching<'a, P: 'static>(&'a Dispatcher<P>);

impl<P: 'static> Drop for StopDispatching<'_, P> {
    fn drop(&mut self) {
        self.0.stop_dispatching();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn Fn()>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let make = move |name: &'static str| -> Box<dyn Fn()> {
            let sink = sink.clone();
            Box::new(move || sink.borrow_mut().push(name))
        };
        (log, make)
    }

    #[test]
    fn dispatch_runs_callbacks_in_registration_order() {
        let dispatcher: Dispatcher<u32> = Dispatcher::enforced();
        let (log, make) = recorder();

        for name in ["a", "b", "c"] {
            let record = make(name);
            dispatcher
                .register(move |_, _| {
                    record();
                    Ok(())
                })
                .unwrap();
        }

        dispatcher.dispatch(1).unwrap();
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn wait_for_runs_dependency_first_and_only_once() {
        let dispatcher: Dispatcher<u32> = Dispatcher::enforced();
        let (log, make) = recorder();
        let dep = Rc::new(Cell::new(None::<DispatchToken>));

        let record = make("dependent");
        let dep_token = dep.clone();
        dispatcher
            .register(move |_, d: &Dispatcher<u32>| {
                d.wait_for(dep_token.get())?;
                record();
                Ok(())
            })
            .unwrap();

        let record = make("dependency");
        let token = dispatcher
            .register(move |_, _| {
                record();
                Ok(())
            })
            .unwrap();
        dep.set(Some(token));

        dispatcher.dispatch(1).unwrap();
        assert_eq!(*log.borrow(), vec!["dependency", "dependent"]);
        assert_eq!(dispatcher.callback_state(token), Some(CallbackState::Handled));
    }

    #[test]
    fn state_is_torn_down_after_callback_error() {
        let dispatcher: Dispatcher<u32> = Dispatcher::enforced();
        let failing = dispatcher
            .register(|_, _| Err(anyhow::anyhow!("store exploded")))
            .unwrap();
        let after = dispatcher.register(|_, _| Ok(())).unwrap();

        let err = dispatcher.dispatch(1).unwrap_err();
        assert!(matches!(err, DispatchError::Callback { token, .. } if token == failing));
        assert!(!dispatcher.is_dispatching());
        assert_eq!(dispatcher.callback_state(failing), Some(CallbackState::Pending));
        assert_eq!(dispatcher.callback_state(after), Some(CallbackState::Idle));
    }

    #[test]
    fn register_during_dispatch_is_rejected() {
        let dispatcher: Dispatcher<u32> = Dispatcher::enforced();
        dispatcher
            .register(|_, d: &Dispatcher<u32>| {
                d.register(|_, _| Ok(()))?;
                Ok(())
            })
            .unwrap();

        let err = dispatcher.dispatch(1).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::RegistryLocked {
                operation: "register",
                ..
            }
        ));
        assert_eq!(dispatcher.len(), 1);
    }

    #[test]
    fn unregister_during_dispatch_is_rejected() {
        let dispatcher: Dispatcher<u32> = Dispatcher::enforced();
        let other = dispatcher.register(|_, _| Ok(())).unwrap();
        dispatcher
            .register(move |_, d: &Dispatcher<u32>| {
                d.unregister(other)?;
                Ok(())
            })
            .unwrap();

        let err = dispatcher.dispatch(1).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::RegistryLocked {
                operation: "unregister",
                ..
            }
        ));
        assert!(dispatcher.is_registered(other));
    }

    #[test]
    fn states_reset_on_next_dispatch() {
        let dispatcher: Dispatcher<u32> = Dispatcher::enforced();
        let token = dispatcher.register(|_, _| Ok(())).unwrap();
        assert_eq!(dispatcher.callback_state(token), None);

        dispatcher.dispatch(1).unwrap();
        assert_eq!(dispatcher.callback_state(token), Some(CallbackState::Handled));

        let failing = dispatcher
            .register(|_, _| Err(anyhow::anyhow!("nope")))
            .unwrap();
        dispatcher.dispatch(2).unwrap_err();
        assert_eq!(dispatcher.callback_state(token), Some(CallbackState::Handled));
        assert_eq!(dispatcher.callback_state(failing), Some(CallbackState::Pending));
    }

    mod ignored_contracts {
        use super::*;

        fn lenient<P: 'static>() -> Dispatcher<P> {
            Dispatcher::with_config(DispatcherConfig {
                enforcement: Enforcement::Ignore,
            })
        }

        #[test]
        fn unregister_unknown_token_is_silent() {
            let dispatcher: Dispatcher<u32> = lenient();
            let token = dispatcher.register(|_, _| Ok(())).unwrap();
            dispatcher.unregister(token).unwrap();
            assert!(dispatcher.unregister(token).is_ok());
        }

        #[test]
        fn lenient_dispatcher_reports_ignore() {
            let dispatcher: Dispatcher<u32> = lenient();
            assert!(!dispatcher.enforcement().is_enforced());
            assert!(Dispatcher::<u32>::enforced().enforcement().is_enforced());
        }

        #[test]
        fn wait_for_outside_dispatch_skips_without_touching_state() {
            let dispatcher: Dispatcher<u32> = lenient();
            let token = dispatcher
                .register(|_, _| panic!("must not run without a payload"))
                .unwrap();
            assert!(dispatcher.wait_for([token]).is_ok());
            assert_eq!(dispatcher.callback_state(token), None);
        }

        #[test]
        fn wait_for_after_dispatch_keeps_last_broadcast_record() {
            let dispatcher: Dispatcher<u32> = lenient();
            let failing = dispatcher
                .register(|_, _| Err(anyhow::anyhow!("nope")))
                .unwrap();
            let skipped = dispatcher.register(|_, _| Ok(())).unwrap();

            dispatcher.dispatch(1).unwrap_err();
            assert!(dispatcher.wait_for([skipped]).is_ok());
            assert_eq!(dispatcher.callback_state(failing), Some(CallbackState::Pending));
            assert_eq!(dispatcher.callback_state(skipped), Some(CallbackState::Idle));
        }

        #[test]
        fn registry_changes_mid_dispatch_do_not_join_the_broadcast() {
            let dispatcher: Dispatcher<u32> = lenient();
            let (log, make) = recorder();
            let later = Rc::new(Cell::new(None::<DispatchToken>));
            let added = Rc::new(Cell::new(None::<DispatchToken>));

            let (record, removed, added_slot) = (make("a"), later.clone(), added.clone());
            let late_record = Rc::new(make("added"));
            dispatcher
                .register(move |_, d: &Dispatcher<u32>| {
                    record();
                    if let Some(token) = removed.get() {
                        d.unregister(token)?;
                    }
                    let late_record = late_record.clone();
                    added_slot.set(Some(d.register(move |_, _| {
                        late_record();
                        Ok(())
                    })?));
                    Ok(())
                })
                .unwrap();

            let record = make("removed");
            let token = dispatcher
                .register(move |_, _| {
                    record();
                    Ok(())
                })
                .unwrap();
            later.set(Some(token));

            dispatcher.dispatch(1).unwrap();

            assert_eq!(*log.borrow(), vec!["a"]);
            assert_eq!(dispatcher.len(), 2);
            assert!(!dispatcher.is_registered(token));
            let added = added.get().unwrap();
            assert!(dispatcher.is_registered(added));
            assert_eq!(dispatcher.callback_state(added), None);
            assert_eq!(dispatcher.callback_state(token), Some(CallbackState::Idle));
        }

        #[test]
        fn circular_wait_is_skipped() {
            let dispatcher: Dispatcher<u32> = lenient();
            let first = Rc::new(Cell::new(None::<DispatchToken>));
            let runs = Rc::new(Cell::new(0));

            let first_token = first.clone();
            let counter = runs.clone();
            let token = dispatcher
                .register(move |_, d: &Dispatcher<u32>| {
                    d.wait_for(first_token.get())?;
                    counter.set(counter.get() + 1);
                    Ok(())
                })
                .unwrap();
            first.set(Some(token));

            dispatcher.dispatch(1).unwrap();
            assert_eq!(runs.get(), 1);
            assert_eq!(dispatcher.callback_state(token), Some(CallbackState::Handled));
        }

        #[test]
        fn unknown_token_in_wait_for_still_fails_lookup() {
            let dispatcher: Dispatcher<u32> = lenient();
            let ghost = dispatcher.register(|_, _| Ok(())).unwrap();
            dispatcher.unregister(ghost).unwrap();

            dispatcher
                .register(move |_, d: &Dispatcher<u32>| {
                    d.wait_for([ghost])?;
                    Ok(())
                })
                .unwrap();

            let err = dispatcher.dispatch(1).unwrap_err();
            assert!(matches!(err, DispatchError::UnknownToken { token, .. } if token == ghost));
        }

        #[test]
        fn nested_dispatch_ends_outer_broadcast() {
            let dispatcher: Dispatcher<u32> = lenient();
            let (log, make) = recorder();

            let record = make("outer-first");
            dispatcher
                .register(move |payload, d: &Dispatcher<u32>| {
                    if *payload == 1 {
                        record();
                        d.dispatch(2)?;
                    }
                    Ok(())
                })
                .unwrap();
            let record = make("second");
            dispatcher
                .register(move |_, _| {
                    record();
                    Ok(())
                })
                .unwrap();

            dispatcher.dispatch(1).unwrap();
            assert!(!dispatcher.is_dispatching());
            // The nested broadcast handled "second", so the outer loop skips it.
            assert_eq!(*log.borrow(), vec!["outer-first", "second"]);
        }
    }
}
