//! Agent sessions for agentwire.
//!
//! An [`AgentEngine`] owns agents. Each agent has its own [`EventBus`] and a
//! set of reactors that turn raw driver output into messages, tool exchanges,
//! and state transitions on that bus. Callers hold [`AgentHandle`]s.

pub mod bus;
pub mod engine;
pub mod react;
pub mod reactor;
pub mod reactors;
pub mod session;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use bus::{EventBus, EventFilter, EventHandler, Subscription, WeakEventBus};
pub use engine::{AgentBuilder, AgentEngine};
pub use react::Reactions;
pub use reactor::{Reactor, ReactorContext, ReactorRegistry};
pub use session::AgentHandle;

/// A panicking handler must not wedge the agent, so poisoned locks are
/// taken over as-is.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
