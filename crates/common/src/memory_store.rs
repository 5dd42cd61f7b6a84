use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::store::{Notification, RemoteStore, StoreError, Subscription, SubscriptionId};

/// Most recent `get`/`set` calls kept in the journal.
pub const CALL_JOURNAL_LIMIT: usize = 256;

/// A request the store served, kept for inspection.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Get(String),
    Set(String, Value),
}

#[derive(Default)]
struct Inner {
    values: HashMap<String, Value>,
    subscribers: HashMap<SubscriptionId, (String, mpsc::UnboundedSender<Notification>)>,
    next_id: u64,
    unsubscribe_calls: usize,
    failing_gets: HashSet<String>,
    failing_sets: HashSet<String>,
    offline: bool,
    calls: VecDeque<StoreCall>,
}

impl Inner {
    fn journal(&mut self, call: StoreCall) {
        if self.calls.len() == CALL_JOURNAL_LIMIT {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
    }

    fn notify(&mut self, path: &str, notification: Notification) {
        self.subscribers.retain(|_, (sub_path, tx)| {
            if sub_path.as_str() != path {
                return true;
            }
            tx.send(notification.clone()).is_ok()
        });
    }
}

/// In-process realtime store.
///
/// Serves the console dashboard and the replay runner, and stands in for the
/// managed store in tests: it can be seeded, written to by an "external"
/// writer, and told to fail individual requests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    latency: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed<I, K>(seed: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let store = Self::new();
        {
            let mut inner = store.lock();
            for (path, value) in seed {
                if !value.is_null() {
                    inner.values.insert(path.into(), value);
                }
            }
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delay applied to every `get` and `set`, to widen the window of a toggle.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Writes a value as another client would. `None` deletes the path.
    pub fn publish(&self, path: &str, value: Option<Value>) {
        let mut inner = self.lock();
        match value.clone().filter(|v| !v.is_null()) {
            Some(v) => {
                inner.values.insert(path.to_string(), v);
            }
            None => {
                inner.values.remove(path);
            }
        }
        inner.notify(path, Ok(value.filter(|v| !v.is_null())));
    }

    /// Delivers a transport error to every live subscription on `path`.
    pub fn inject_error(&self, path: &str, reason: &str) {
        let error = StoreError::Transport {
            path: path.to_string(),
            reason: reason.to_string(),
        };
        self.lock().notify(path, Err(error));
    }

    /// While offline every `get` and `set` fails with [`StoreError::Unavailable`].
    pub fn set_online(&self, online: bool) {
        self.lock().offline = !online;
    }

    /// Makes the next `get` on `path` fail.
    pub fn fail_next_get(&self, path: &str) {
        self.lock().failing_gets.insert(path.to_string());
    }

    /// Makes the next `set` on `path` fail.
    pub fn fail_next_set(&self, path: &str) {
        self.lock().failing_sets.insert(path.to_string());
    }

    pub fn value(&self, path: &str) -> Option<Value> {
        self.lock().values.get(path).cloned()
    }

    /// Journal of served requests, oldest first, capped at [`CALL_JOURNAL_LIMIT`].
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.iter().cloned().collect()
    }

    pub fn writes_to(&self, path: &str) -> Vec<Value> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                StoreCall::Set(p, v) if p == path => Some(v.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn subscriber_count(&self, path: &str) -> usize {
        self.lock()
            .subscribers
            .values()
            .filter(|(p, tx)| p == path && !tx.is_closed())
            .count()
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.lock().unsubscribe_calls
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn subscribe(&self, path: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;

        let _ = tx.send(Ok(inner.values.get(path).cloned()));
        inner.subscribers.insert(id, (path.to_string(), tx));
        debug!(path, id = id.0, "subscription registered");

        Subscription {
            id,
            path: path.to_string(),
            updates: rx,
        }
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.lock();
        inner.unsubscribe_calls += 1;
        if inner.subscribers.remove(&id).is_some() {
            debug!(id = id.0, "subscription removed");
        }
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        self.simulate_latency().await;
        let mut inner = self.lock();
        inner.journal(StoreCall::Get(path.to_string()));
        if inner.offline {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        if inner.failing_gets.remove(path) {
            return Err(StoreError::Transport {
                path: path.to_string(),
                reason: "read rejected".to_string(),
            });
        }
        Ok(inner.values.get(path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.simulate_latency().await;
        let mut inner = self.lock();
        inner.journal(StoreCall::Set(path.to_string(), value.clone()));
        if inner.offline {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        if inner.failing_sets.remove(path) {
            return Err(StoreError::Transport {
                path: path.to_string(),
                reason: "write rejected".to_string(),
            });
        }
        if value.is_null() {
            inner.values.remove(path);
            inner.notify(path, Ok(None));
        } else {
            inner.values.insert(path.to_string(), value.clone());
            inner.notify(path, Ok(Some(value)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribe_delivers_current_value_first() {
        let store = MemoryStore::with_seed([("tank/level_percent", json!(64))]);
        let mut sub = store.subscribe("tank/level_percent");
        assert_eq!(sub.updates.recv().await, Some(Ok(Some(json!(64)))));

        let mut empty = store.subscribe("tank/pump");
        assert_eq!(empty.updates.recv().await, Some(Ok(None)));
    }

    #[tokio::test]
    async fn set_is_visible_to_subscribers_of_that_path_only() {
        let store = MemoryStore::new();
        let mut pump = store.subscribe("soil/pump1");
        let mut other = store.subscribe("soil/pump2");
        pump.updates.recv().await;
        other.updates.recv().await;

        store.set("soil/pump1", json!(true)).await.unwrap();

        assert_eq!(pump.updates.recv().await, Some(Ok(Some(json!(true)))));
        assert!(other.updates.try_recv().is_err());
    }

    #[tokio::test]
    async fn injected_failures_are_one_shot() {
        let store = MemoryStore::with_seed([("tank/pump", json!(false))]);
        store.fail_next_get("tank/pump");

        assert!(store.get("tank/pump").await.is_err());
        assert_eq!(store.get("tank/pump").await, Ok(Some(json!(false))));
    }

    #[tokio::test]
    async fn offline_store_rejects_requests_until_back_online() {
        let store = MemoryStore::with_seed([("soil/pump2", json!(true))]);
        store.set_online(false);

        assert!(matches!(store.get("soil/pump2").await, Err(StoreError::Unavailable(_))));
        assert!(store.set("soil/pump2", json!(false)).await.is_err());
        assert_eq!(store.value("soil/pump2"), Some(json!(true)));

        store.set_online(true);
        assert_eq!(store.get("soil/pump2").await, Ok(Some(json!(true))));
    }

    #[tokio::test]
    async fn call_journal_keeps_only_the_latest_requests() {
        let store = MemoryStore::new();
        for i in 0..CALL_JOURNAL_LIMIT {
            store.set("soil/pump1", json!(i % 2 == 0)).await.unwrap();
        }
        store.get("tank/pump").await.unwrap();

        let calls = store.calls();
        assert_eq!(calls.len(), CALL_JOURNAL_LIMIT);
        assert_eq!(calls[0], StoreCall::Set("soil/pump1".to_string(), json!(false)));
        assert_eq!(calls.last(), Some(&StoreCall::Get("tank/pump".to_string())));
    }

    #[test]
    fn unsubscribe_drops_the_sender() {
        let store = MemoryStore::new();
        let sub = store.subscribe("light/state");
        assert_eq!(store.subscriber_count("light/state"), 1);

        store.unsubscribe(sub.id);
        store.unsubscribe(sub.id);

        assert_eq!(store.subscriber_count("light/state"), 0);
        assert_eq!(store.unsubscribe_calls(), 2);
    }
}
