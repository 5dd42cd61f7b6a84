use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use common::{Decode, Notification, RemoteStore, RemoteValue, SharedDiagnostics, SubscriptionId};

/// Called once per delivered notification, in delivery order.
pub type Observer<T> = Arc<dyn Fn(&RemoteValue<T>) + Send + Sync>;

struct Live {
    id: SubscriptionId,
    pump: JoinHandle<()>,
    /// Closed before the pump is aborted; the pump delivers nothing once it is set.
    closed: Arc<AtomicBool>,
}

/// The live half of a mirror: one store subscription plus the task pumping it.
struct Binding {
    store: Arc<dyn RemoteStore>,
    live: Mutex<Option<Live>>,
}

impl Binding {
    /// Unregisters the subscription the first time it is called; later calls do nothing.
    fn release(&self) {
        let taken = self.live.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(live) = taken {
            live.closed.store(true, Ordering::Release);
            live.pump.abort();
            self.store.unsubscribe(live.id);
        }
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.release();
    }
}

/// Keeps one local tri-state value in step with one remote path.
pub struct RemoteValueMirror<T: Decode + Clone> {
    path: String,
    store: Arc<dyn RemoteStore>,
    diagnostics: Arc<SharedDiagnostics>,
    observer: Option<Observer<T>>,
    value_tx: Arc<watch::Sender<RemoteValue<T>>>,
    binding: Binding,
}

impl<T: Decode + Clone> RemoteValueMirror<T> {
    pub fn bind(
        store: Arc<dyn RemoteStore>,
        path: &str,
        diagnostics: Arc<SharedDiagnostics>,
    ) -> Self {
        Self::bind_with_observer(store, path, diagnostics, None)
    }

    pub fn bind_with_observer(
        store: Arc<dyn RemoteStore>,
        path: &str,
        diagnostics: Arc<SharedDiagnostics>,
        observer: Option<Observer<T>>,
    ) -> Self {
        let (value_tx, _) = watch::channel(RemoteValue::Unknown);
        let mut mirror = Self {
            path: path.to_string(),
            store: Arc::clone(&store),
            diagnostics,
            observer,
            value_tx: Arc::new(value_tx),
            binding: Binding {
                store,
                live: Mutex::new(None),
            },
        };
        mirror.attach();
        mirror
    }

    fn attach(&mut self) {
        let mut subscription = self.store.subscribe(&self.path);
        let id = subscription.id;
        let path = self.path.clone();
        let value_tx = Arc::clone(&self.value_tx);
        let diagnostics = Arc::clone(&self.diagnostics);
        let observer = self.observer.clone();
        let closed = Arc::new(AtomicBool::new(false));
        let pump_closed = Arc::clone(&closed);

        let pump = tokio::spawn(async move {
            while let Some(notification) = subscription.updates.recv().await {
                if pump_closed.load(Ordering::Acquire) {
                    break;
                }
                let next = interpret::<T>(&path, notification, &diagnostics);

                // Checked under the watch lock so a released binding can never
                // overwrite the value a resubscribe has just reset.
                let delivered = value_tx.send_if_modified(|current| {
                    if pump_closed.load(Ordering::Acquire) {
                        return false;
                    }
                    *current = next.clone();
                    true
                });
                if !delivered {
                    break;
                }
                if let Some(observer) = &observer {
                    if pump_closed.load(Ordering::Acquire) {
                        break;
                    }
                    observer(&next);
                }
            }
            debug!(path = %path, "subscription stream closed");
        });

        *self.binding.live.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Live { id, pump, closed });
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Latest mirrored value.
    pub fn current(&self) -> RemoteValue<T> {
        self.value_tx.borrow().clone()
    }

    /// A receiver that wakes on every published value.
    pub fn watch(&self) -> watch::Receiver<RemoteValue<T>> {
        self.value_tx.subscribe()
    }

    pub fn is_bound(&self) -> bool {
        self.binding
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Detaches from the store. Safe to call any number of times.
    pub fn release(&self) {
        self.binding.release();
    }

    /// Drops the current subscription and starts a fresh one from Unknown.
    pub fn resubscribe(&mut self) {
        self.binding.release();
        self.value_tx.send_replace(RemoteValue::Unknown);
        self.attach();
    }
}

fn interpret<T: Decode>(
    path: &str,
    notification: Notification,
    diagnostics: &SharedDiagnostics,
) -> RemoteValue<T> {
    diagnostics.record_notification();
    match notification {
        Ok(Some(raw)) => match T::decode(&raw) {
            Some(value) => {
                debug!(path, %raw, "value received");
                RemoteValue::Present(value)
            }
            None => {
                warn!(path, %raw, "payload could not be decoded, treating as unknown");
                diagnostics.record_decode_failure();
                RemoteValue::Unknown
            }
        },
        Ok(None) => {
            debug!(path, "value absent");
            RemoteValue::Unknown
        }
        Err(error) => {
            warn!(path, %error, "subscription error, treating as unknown");
            diagnostics.record_subscription_error();
            RemoteValue::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn fixture() -> (Arc<MemoryStore>, Arc<dyn RemoteStore>, Arc<SharedDiagnostics>) {
        let store = Arc::new(MemoryStore::new());
        let handle: Arc<dyn RemoteStore> = store.clone();
        (store, handle, Arc::new(SharedDiagnostics::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn starts_unknown_and_follows_notifications() {
        let (store, handle, diagnostics) = fixture();
        let mirror = RemoteValueMirror::<f64>::bind(handle, "soil/sensor1_percent", diagnostics);
        assert_eq!(mirror.current(), RemoteValue::Unknown);

        settle().await;
        assert_eq!(mirror.current(), RemoteValue::Unknown);

        store.publish("soil/sensor1_percent", Some(json!(45)));
        settle().await;
        assert_eq!(mirror.current(), RemoteValue::Present(45.0));

        store.publish("soil/sensor1_percent", None);
        settle().await;
        assert_eq!(mirror.current(), RemoteValue::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_and_bad_payloads_degrade_to_unknown() {
        let (store, handle, diagnostics) = fixture();
        let mirror =
            RemoteValueMirror::<bool>::bind(handle, "tank/pump", Arc::clone(&diagnostics));

        store.publish("tank/pump", Some(json!(true)));
        settle().await;
        assert_eq!(mirror.current(), RemoteValue::Present(true));

        store.inject_error("tank/pump", "connection reset");
        settle().await;
        assert_eq!(mirror.current(), RemoteValue::Unknown);

        store.publish("tank/pump", Some(json!(false)));
        settle().await;
        assert_eq!(mirror.current(), RemoteValue::Present(false));

        store.publish("tank/pump", Some(json!("yes")));
        settle().await;
        assert_eq!(mirror.current(), RemoteValue::Unknown);

        let counters = diagnostics.snapshot();
        assert_eq!(counters.subscription_errors, 1);
        assert_eq!(counters.decode_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn observer_sees_every_value_in_order() {
        let (store, handle, diagnostics) = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: Observer<f64> =
            Arc::new(move |v: &RemoteValue<f64>| sink.lock().unwrap().push(v.clone()));
        let _mirror = RemoteValueMirror::bind_with_observer(
            handle,
            "tank/level_percent",
            diagnostics,
            Some(observer),
        );

        store.publish("tank/level_percent", Some(json!(10)));
        store.publish("tank/level_percent", Some(json!(10)));
        store.publish("tank/level_percent", Some(json!(12)));
        settle().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                RemoteValue::Unknown,
                RemoteValue::Present(10.0),
                RemoteValue::Present(10.0),
                RemoteValue::Present(12.0),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn watchers_wake_on_new_values() {
        let (store, handle, diagnostics) = fixture();
        let mirror =
            RemoteValueMirror::<String>::bind(handle, "security/last_motion_time", diagnostics);
        let mut values = mirror.watch();

        store.publish("security/last_motion_time", Some(json!("2024-05-01 22:14:03")));
        values.wait_for(|v| !v.is_unknown()).await.unwrap();

        assert_eq!(
            mirror.current(),
            RemoteValue::Present("2024-05-01 22:14:03".to_string())
        );
        assert_eq!(mirror.path(), "security/last_motion_time");
    }

    #[tokio::test(start_paused = true)]
    async fn release_is_idempotent_and_stops_updates() {
        let (store, handle, diagnostics) = fixture();
        let mirror = RemoteValueMirror::<f64>::bind(handle, "weather/humidity", diagnostics);
        store.publish("weather/humidity", Some(json!(55)));
        settle().await;
        assert_eq!(store.subscriber_count("weather/humidity"), 1);

        mirror.release();
        mirror.release();
        assert_eq!(store.unsubscribe_calls(), 1);
        assert_eq!(store.subscriber_count("weather/humidity"), 0);
        assert!(!mirror.is_bound());

        store.publish("weather/humidity", Some(json!(80)));
        settle().await;
        assert_eq!(mirror.current(), RemoteValue::Present(55.0));

        drop(mirror);
        assert_eq!(store.unsubscribe_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribe_starts_from_unknown() {
        let (store, handle, diagnostics) = fixture();
        let mut mirror = RemoteValueMirror::<f64>::bind(handle, "weather/temperature", diagnostics);
        store.publish("weather/temperature", Some(json!(21.5)));
        settle().await;

        mirror.resubscribe();
        assert_eq!(mirror.current(), RemoteValue::Unknown);
        assert_eq!(store.unsubscribe_calls(), 1);

        settle().await;
        assert_eq!(mirror.current(), RemoteValue::Present(21.5));
        assert_eq!(store.subscriber_count("weather/temperature"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn release_stops_delivery_while_the_pump_is_busy() {
        let (store, handle, diagnostics) = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let observer: Observer<f64> = Arc::new(move |_: &RemoteValue<f64>| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2));
        });
        let mirror = RemoteValueMirror::bind_with_observer(
            handle,
            "tank/level_percent",
            diagnostics,
            Some(observer),
        );
        for level in 0..50 {
            store.publish("tank/level_percent", Some(json!(level)));
        }

        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_micros(100)).await;
        }
        mirror.release();
        let calls_at_release = calls.load(Ordering::SeqCst);
        let value_at_release = mirror.current();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let calls_after = calls.load(Ordering::SeqCst);
        assert!(
            calls_after <= calls_at_release + 1,
            "observer ran {calls_after} times, {calls_at_release} at release"
        );
        assert_eq!(mirror.current(), value_at_release);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn resubscribe_is_not_overwritten_by_the_old_pump() {
        let (store, handle, diagnostics) = fixture();
        let mut mirror =
            RemoteValueMirror::<f64>::bind(handle, "weather/humidity", diagnostics);
        for level in 0..200 {
            store.publish("weather/humidity", Some(json!(level)));
        }

        mirror.resubscribe();
        let mut values = mirror.watch();
        let first = values.wait_for(|v| !v.is_unknown()).await.unwrap().clone();

        // The fresh subscription starts from the stored value, the last publish
        assert_eq!(first, RemoteValue::Present(199.0));
    }
}
