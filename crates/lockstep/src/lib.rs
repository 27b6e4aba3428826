//! # Lockstep
//!
//! A synchronous broadcast dispatcher for unidirectional data flow.
//!
//! Every dispatched payload reaches every registered callback. There are no
//! topics: stores decide for themselves which payloads they care about.
//! Ordering between stores is declared at the moment it matters, by calling
//! [`Dispatcher::wait_for`] from inside a callback with the tokens of the
//! stores whose updates must land first.
//!
//! ## Architecture
//!
//! ```text
//! dispatch(payload)
//!     │
//!     ▼ registration order
//! ┌── CountryStore ─────────────────────────► handled
//! │
//! ├── CityStore ── wait_for([Country]) ─ already handled ─► handled
//! │
//! └── PriceStore ── wait_for([City]) ─ already handled ─► handled
//! ```
//!
//! When a dependency hasn't run yet, `wait_for` runs it right there, on the
//! same stack, and the main loop later skips it.
//!
//! ## Key Invariants
//!
//! 1. **Every callback sees every payload** - exactly once per dispatch
//! 2. **Registration order by default** - `wait_for` is the only reordering
//! 3. **No nesting** - a dispatch never starts while another is running
//! 4. **Cycles fail fast** - waiting on a callback that's on the stack is an error
//! 5. **Teardown always runs** - a failed dispatch leaves the dispatcher usable
//!
//! Contract checks go through [`Enforcement`]; see [`DispatcherConfig`] for
//! how the mode is chosen.
//!
//! ## Example
//!
//! ```
//! use std::cell::{Cell, RefCell};
//! use std::rc::Rc;
//!
//! use lockstep::{DispatchToken, Dispatcher};
//!
//! let dispatcher: Dispatcher<&str> = Dispatcher::enforced();
//! let country = Rc::new(RefCell::new(String::new()));
//! let city = Rc::new(RefCell::new(String::new()));
//! let country_token = Rc::new(Cell::new(None::<DispatchToken>));
//!
//! // Registered first, but needs the country to be up to date.
//! let (waits_on, reads, writes) = (country_token.clone(), country.clone(), city.clone());
//! dispatcher.register(move |_, d| {
//!     d.wait_for(waits_on.get())?;
//!     *writes.borrow_mut() = format!("capital of {}", reads.borrow());
//!     Ok(())
//! })?;
//!
//! let writes = country.clone();
//! let token = dispatcher.register(move |selected, _| {
//!     *writes.borrow_mut() = selected.to_string();
//!     Ok(())
//! })?;
//! country_token.set(Some(token));
//!
//! dispatcher.dispatch("AU")?;
//! assert_eq!(*city.borrow(), "capital of AU");
//! # Ok::<(), lockstep::DispatchError>(())
//! ```
//!
//! ## What This Is Not
//!
//! Lockstep is **not**:
//! - An async or cross-process message bus
//! - A topic-based pub/sub
//! - A priority queue
//! - Thread-safe (one dispatcher per thread)

// Core modules
mod config;
mod dispatcher;
mod envelope;
mod error;
mod invariant;
mod token;

// Re-export dispatcher types
pub use dispatcher::{Callback, CallbackState, Dispatcher};

// Re-export error types
pub use error::DispatchError;

// Re-export configuration and contract enforcement
pub use config::{DispatcherConfig, ENV_VAR};
pub use invariant::Enforcement;

// Re-export envelope types (tagged-source dispatch)
pub use envelope::{ActionSource, Envelope};

// Re-export token type
pub use token::{DispatchToken, DispatcherId};
