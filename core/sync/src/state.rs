//! Engine state and observer fan-out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Engine status as shown to observers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Nothing running.
    #[default]
    Idle,
    /// A reconciliation pass is in flight.
    Syncing,
    /// The last pass completed.
    Success,
    /// The last pass failed or timed out.
    Error,
}

/// Snapshot of engine state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Current status.
    pub status: EngineStatus,
    /// End of the most recent fully completed pass.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// User-facing message of the last failure.
    pub error_message: Option<String>,
}

impl SyncState {
    /// Idle state with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a pass is in flight.
    pub fn is_syncing(&self) -> bool {
        self.status == EngineStatus::Syncing
    }
}

type Listener = Arc<dyn Fn(&SyncState) + Send + Sync>;

/// Registered state observers.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<BTreeMap<u64, Listener>>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, returning its key.
    pub fn add(&self, listener: Listener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, listener);
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn remove(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nobody is listening.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener in registration order.
    ///
    /// Listeners run outside the registry lock, so they may subscribe or
    /// unsubscribe from inside the callback.
    pub fn notify(&self, state: &SyncState) {
        let listeners: Vec<Listener> = self.lock().values().cloned().collect();
        for listener in listeners {
            listener(state);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, Listener>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle returned by `SyncEngine::subscribe`.
///
/// Dropping the handle leaves the listener registered; call `unsubscribe`
/// to stop notifications.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl Subscription {
    pub(crate) fn new(id: u64, registry: &Arc<ListenerRegistry>) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    /// Stop notifications. Returns whether the listener was still registered.
    pub fn unsubscribe(self) -> bool {
        self.registry
            .upgrade()
            .map(|registry| registry.remove(self.id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_state_defaults_to_idle() {
        let state = SyncState::new();
        assert_eq!(state.status, EngineStatus::Idle);
        assert!(state.last_sync_time.is_none());
        assert!(state.error_message.is_none());
        assert!(!state.is_syncing());
    }

    #[test]
    fn test_state_serializes_camel_case() {
        let state = SyncState {
            status: EngineStatus::Error,
            last_sync_time: None,
            error_message: Some("Sync failed".to_string()),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["errorMessage"], "Sync failed");
    }

    #[test]
    fn test_notify_and_unsubscribe() {
        let registry = Arc::new(ListenerRegistry::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let id = registry.add(Arc::new(move |_state: &SyncState| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let subscription = Subscription::new(id, &registry);

        registry.notify(&SyncState::new());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(subscription.unsubscribe());
        registry.notify(&SyncState::new());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_listener_may_reenter_registry() {
        let registry = Arc::new(ListenerRegistry::new());
        let inner = registry.clone();
        registry.add(Arc::new(move |_state: &SyncState| {
            let _ = inner.len();
        }));

        registry.notify(&SyncState::new());
        assert_eq!(registry.len(), 1);
    }
}
