//! In-process registry of armed delay timers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::AbortHandle;
use uuid::Uuid;

/// Identifies one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub flow_id: Uuid,
    pub patient_id: Uuid,
    pub schedule_id: Uuid,
}

impl std::fmt::Display for TimerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.flow_id, self.patient_id, self.schedule_id)
    }
}

/// Timers armed by this process, so they can be cancelled.
///
/// Lost on restart. The schedule store is what recovery rebuilds this from.
#[derive(Clone, Default)]
pub struct TimerRegistry {
    timers: Arc<Mutex<HashMap<TimerKey, AbortHandle>>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TimerKey, AbortHandle>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn a task that runs `on_fire` after `delay`, tracked under `key`.
    ///
    /// The entry is removed right before `on_fire` runs. Arming a key that is
    /// already armed aborts the previous timer.
    pub fn arm<F, Fut>(&self, key: TimerKey, delay: Duration, on_fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let registry = self.clone();
        // Held across spawn + insert so the task cannot remove its entry before it exists.
        let mut timers = self.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry.lock().remove(&key);
            on_fire().await;
        });
        if let Some(previous) = timers.insert(key, handle.abort_handle()) {
            previous.abort();
        }
    }

    /// Abort and forget the timer for `schedule_id`. Returns whether one was armed.
    pub fn cancel(&self, schedule_id: Uuid) -> bool {
        let mut timers = self.lock();
        let key = timers.keys().find(|k| k.schedule_id == schedule_id).copied();
        match key.and_then(|k| timers.remove(&k)) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, schedule_id: Uuid) -> bool {
        self.lock().keys().any(|k| k.schedule_id == schedule_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Abort every armed timer, e.g. on shutdown.
    pub fn abort_all(&self) -> usize {
        let mut timers = self.lock();
        let count = timers.len();
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        count
    }
}
