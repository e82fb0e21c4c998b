//! Mute state and profile activation
//!
//! - `MuteStateStore`: the one authoritative mute flag with de-duplicated writes
//! - `Controller`: actor serialising activation, toggles and reconciliation
//! - `PollingWatcher`: picks up mute changes made outside the daemon

mod machine;
mod poller;
mod store;

pub use machine::{Collaborators, ControlError, Controller, ControllerHandle};
pub use poller::PollingWatcher;
pub use store::MuteStateStore;

#[cfg(test)]
pub(crate) use machine::testing;
