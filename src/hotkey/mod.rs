//! Hotkey module for global keyboard shortcuts
//!
//! Parses toggle keys, expands modifier-ignoring variants, registers them
//! with the OS and dispatches presses to the active profile's callback.

mod keys;
mod listener;
mod platform;
mod registry;

pub use keys::{Binding, KeySpec};
pub use listener::HotkeyListener;
pub use platform::HotkeyPump;
pub use registry::{DetachedBackend, HotkeyBackend, HotkeyCallback, HotkeyError, HotkeyRegistry};

#[cfg(test)]
pub(crate) use registry::testing;
