//! Once-per-process shared instances.
//!
//! The pool and the scheduler facade are normally built once at startup and
//! passed around explicitly. `ProcessCell` covers callers that need a lazily
//! built shared instance instead: the first successful initialization wins and
//! every later caller gets the same `Arc`, whatever arguments it brings.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Double-checked lazy slot holding one `Arc<T>`.
///
/// Reads after initialization are lock-free; initialization runs under a lock
/// so at most one initializer executes at a time. A failed initializer leaves
/// the cell empty and the next caller tries again.
#[derive(Debug)]
pub struct ProcessCell<T> {
    slot: OnceLock<Arc<T>>,
    init: Mutex<()>,
}

impl<T> ProcessCell<T> {
    pub const fn new() -> Self {
        Self {
            slot: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    /// The shared instance, if one was built.
    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.get().cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.get().is_some()
    }

    /// Return the shared instance, building it with `init` on first use.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> Arc<T> {
        match self.get_or_try_init(|| Ok::<T, core::convert::Infallible>(init())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Fallible variant of [`ProcessCell::get_or_init`].
    pub fn get_or_try_init<E>(&self, init: impl FnOnce() -> Result<T, E>) -> Result<Arc<T>, E> {
        if let Some(existing) = self.slot.get() {
            return Ok(existing.clone());
        }

        let _guard = self.init.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = self.slot.get() {
            return Ok(existing.clone());
        }

        let value = Arc::new(init()?);
        // Only this thread can set the slot while holding the init lock.
        let _ = self.slot.set(value.clone());
        Ok(value)
    }
}

impl<T> Default for ProcessCell<T> {
    fn default() -> Self {
        Self::new()
    }
}
