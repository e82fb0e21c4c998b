//! Global hotkey registration with all-or-nothing semantics
//!
//! The registry owns the set of bindings currently held with the OS and
//! the single callback they fire. A registration that fails part-way is
//! rolled back before the error is returned.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use super::keys::{Binding, KeySpec};

/// Callback fired when any registered binding is pressed
pub type HotkeyCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Errors that can occur while registering global hotkeys
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HotkeyError {
    #[error("hotkey {binding} is already bound by another application or profile")]
    Conflict { binding: String },

    #[error("invalid hotkey: {0}")]
    InvalidKey(String),

    #[error("hotkey backend error: {0}")]
    Backend(String),

    #[error("hotkey listener is already running")]
    AlreadyRunning,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),
}

/// Platform capability that binds individual key combinations
pub trait HotkeyBackend: Send + Sync {
    fn register(&self, binding: &Binding) -> Result<(), HotkeyError>;
    fn unregister(&self, binding: &Binding) -> Result<(), HotkeyError>;
}

/// Backend used when no platform hotkey manager is available.
///
/// Registrations succeed but nothing is ever bound, so only explicit
/// toggle requests reach the controller.
pub struct DetachedBackend;

impl HotkeyBackend for DetachedBackend {
    fn register(&self, binding: &Binding) -> Result<(), HotkeyError> {
        debug!(%binding, "hotkeys unavailable, binding not attached");
        Ok(())
    }

    fn unregister(&self, _binding: &Binding) -> Result<(), HotkeyError> {
        Ok(())
    }
}

#[derive(Default)]
struct Registered {
    bindings: Vec<Binding>,
    callback: Option<HotkeyCallback>,
}

/// Owns the live binding set and its callback
pub struct HotkeyRegistry {
    backend: Arc<dyn HotkeyBackend>,
    registered: Mutex<Registered>,
}

impl HotkeyRegistry {
    pub fn new(backend: Arc<dyn HotkeyBackend>) -> Self {
        Self {
            backend,
            registered: Mutex::new(Registered::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registered> {
        self.registered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `spec` (expanded when `ignore_modifiers` is set) and bind
    /// every variant to `callback`.
    ///
    /// Anything registered before is released first, so at most one
    /// callback is ever live. On failure no variant stays registered.
    pub fn register(
        &self,
        spec: &KeySpec,
        ignore_modifiers: bool,
        callback: HotkeyCallback,
    ) -> Result<Vec<Binding>, HotkeyError> {
        let mut registered = self.lock();
        self.release(&mut registered);

        let variants = spec.bindings(ignore_modifiers);
        for (index, binding) in variants.iter().enumerate() {
            if let Err(e) = self.backend.register(binding) {
                warn!(%binding, error = %e, "hotkey registration failed, rolling back");
                for done in variants[..index].iter().rev() {
                    if let Err(e) = self.backend.unregister(done) {
                        warn!(binding = %done, error = %e, "rollback unregister failed");
                    }
                }
                return Err(e);
            }
        }

        info!(hotkey = %spec, key = spec.key(), variants = variants.len(), "hotkey registered");
        registered.bindings = variants.clone();
        registered.callback = Some(callback);
        Ok(variants)
    }

    /// Unregister every binding. Safe to call when nothing is registered.
    pub fn unregister_all(&self) {
        let mut registered = self.lock();
        self.release(&mut registered);
    }

    fn release(&self, registered: &mut Registered) {
        if registered.bindings.is_empty() && registered.callback.is_none() {
            return;
        }
        for binding in registered.bindings.drain(..) {
            if let Err(e) = self.backend.unregister(&binding) {
                warn!(%binding, error = %e, "failed to unregister hotkey");
            }
        }
        registered.callback = None;
        debug!("hotkeys released");
    }

    /// Fire the callback if `binding` belongs to the live set.
    pub fn dispatch(&self, binding: &Binding) -> bool {
        let callback = {
            let registered = self.lock();
            if !registered.bindings.contains(binding) {
                return false;
            }
            registered.callback.clone()
        };

        match callback {
            Some(callback) => {
                debug!(%binding, "hotkey fired");
                callback();
                true
            }
            None => false,
        }
    }

    /// Snapshot of the bindings currently held
    #[cfg(test)]
    pub fn registered(&self) -> Vec<Binding> {
        self.lock().bindings.clone()
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::testing::RecordingBackend;
    use super::*;

    fn counter() -> (Arc<AtomicUsize>, HotkeyCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        let callback: HotkeyCallback = Arc::new(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    #[test]
    fn test_register_literal() {
        let backend = RecordingBackend::new();
        let registry = HotkeyRegistry::new(backend.clone());
        let (_, callback) = counter();

        let bindings = registry
            .register(&KeySpec::parse("F9").unwrap(), false, callback)
            .unwrap();

        assert_eq!(bindings.len(), 1);
        assert_eq!(backend.bound().len(), 1);
        assert!(backend.bound().contains("F9"));
    }

    #[test]
    fn test_register_ignoring_modifiers() {
        let backend = RecordingBackend::new();
        let registry = HotkeyRegistry::new(backend.clone());
        let (_, callback) = counter();

        registry
            .register(&KeySpec::parse("F9").unwrap(), true, callback)
            .unwrap();

        assert_eq!(registry.registered().len(), 8);
        assert_eq!(backend.bound().len(), 8);
        assert!(backend.bound().contains("Ctrl+Alt+Shift+F9"));
    }

    #[test]
    fn test_conflict_rolls_back_every_variant() {
        let backend = RecordingBackend::new();
        // fifth variant in expansion order
        backend.conflict_on("Ctrl+Alt+F9");
        let registry = HotkeyRegistry::new(backend.clone());
        let (_, callback) = counter();

        let result = registry.register(&KeySpec::parse("F9").unwrap(), true, callback);

        assert!(matches!(result, Err(HotkeyError::Conflict { .. })));
        assert_eq!(backend.register_calls(), 5);
        assert_eq!(backend.unregister_calls(), 4);
        assert!(backend.bound().is_empty());
        assert!(registry.registered().is_empty());
    }

    #[test]
    fn test_unregister_all_is_idempotent() {
        let backend = RecordingBackend::new();
        let registry = HotkeyRegistry::new(backend.clone());
        registry.unregister_all();

        let (_, callback) = counter();
        registry
            .register(&KeySpec::parse("Ctrl+M").unwrap(), false, callback)
            .unwrap();
        registry.unregister_all();
        registry.unregister_all();

        assert!(backend.bound().is_empty());
        assert_eq!(backend.unregister_calls(), 1);
    }

    #[test]
    fn test_register_replaces_previous_set() {
        let backend = RecordingBackend::new();
        let registry = HotkeyRegistry::new(backend.clone());
        let (first, first_cb) = counter();
        let (second, second_cb) = counter();

        registry
            .register(&KeySpec::parse("F9").unwrap(), false, first_cb)
            .unwrap();
        registry
            .register(&KeySpec::parse("F10").unwrap(), false, second_cb)
            .unwrap();

        assert_eq!(backend.bound().len(), 1);
        assert!(backend.bound().contains("F10"));

        let old = KeySpec::parse("F9").unwrap().bindings(false).remove(0);
        let new = KeySpec::parse("F10").unwrap().bindings(false).remove(0);
        assert!(!registry.dispatch(&old));
        assert!(registry.dispatch(&new));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_any_variant() {
        let registry = HotkeyRegistry::new(RecordingBackend::new());
        let (count, callback) = counter();
        let spec = KeySpec::parse("F9").unwrap();
        registry.register(&spec, true, callback).unwrap();

        for binding in spec.bindings(true) {
            assert!(registry.dispatch(&binding));
        }
        assert_eq!(count.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_detached_backend_accepts_everything() {
        let registry = HotkeyRegistry::new(Arc::new(DetachedBackend));
        let (_, callback) = counter();
        let bindings = registry
            .register(&KeySpec::parse("F9").unwrap(), true, callback)
            .unwrap();
        assert_eq!(bindings.len(), 8);
    }
}
