//! Interface to the managed realtime key-value store.
//!
//! The store itself is an external collaborator. Everything in the dashboard
//! talks to it through [`RemoteStore`], handed out as one shared
//! `Arc<dyn RemoteStore>` so tests can substitute [`crate::MemoryStore`].

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Failures reported by the store client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// A live subscription or a single request failed in transit.
    #[error("transport error on {path}: {reason}")]
    Transport { path: String, reason: String },

    /// The store connection could not be used at all.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// One delivery on a subscription: a value, `None` for null/absent, or an error.
pub type Notification = Result<Option<Value>, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// A registered subscription on one path.
///
/// Notifications for a single path arrive in source order. Nothing is
/// promised about ordering across paths.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub path: String,
    pub updates: mpsc::UnboundedReceiver<Notification>,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Registers a subscription. The store delivers the current value (or
    /// `None`) first, then every later change, at least once.
    fn subscribe(&self, path: &str) -> Subscription;

    /// Unregisters a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;
}
