//! Update listeners notified after each successful refresh

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

pub type UpdateListener = Arc<dyn Fn() + Send + Sync>;

/// Ordered listener list
///
/// A panicking listener is logged and skipped; the remaining listeners
/// still run.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<Vec<UpdateListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: UpdateListener) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener in registration order; returns how many panicked
    pub fn notify_all(&self) -> usize {
        // Listeners may register further listeners, so call outside the lock
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut failed = 0;
        for (index, listener) in listeners.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                warn!(index, "Update listener panicked");
                failed += 1;
            }
        }
        failed
    }
}
