//! Built-in reactors wrapping the pipeline stages.
//!
//! Registered in this order for every agent: assembler, pairer, state,
//! history. Message-layer consumers registered later therefore see a
//! message only after the pairer and state machine have.

pub mod assembler;
pub mod history;
pub mod pairer;
pub mod state;

pub use assembler::AssemblerReactor;
pub use history::HistoryReactor;
pub use pairer::PairerReactor;
pub use state::StateReactor;

use crate::bus::Subscription;

fn release(subscription: &mut Option<Subscription>) {
    if let Some(subscription) = subscription.take() {
        subscription.unsubscribe();
    }
}
