use crate::core::models::item::{FavoriteSet, ItemRecord};
use crate::core::store::store::{
    FavoriteStore, SnapshotSink, SnapshotStream, StoreError, snapshot_channel,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// A write that reached the store, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put(String),
    Delete(String),
}

#[derive(Default)]
struct UserFavorites {
    items: FavoriteSet,
    subscribers: Vec<SnapshotSink>,
}

impl UserFavorites {
    /// Fan out the current set, forgetting subscribers that went away
    fn broadcast(&mut self) {
        let items = &self.items;
        self.subscribers.retain(|sink| sink.deliver(items.clone()));
    }
}

/// In process favorite store for development and tests.
///
/// Besides the [`FavoriteStore`] contract it can reject writes,
/// hold writes in flight behind a gate and break live subscriptions,
/// so callers can exercise failure and interleaving paths.
pub struct LocalFavoriteStore {
    users: Mutex<HashMap<String, UserFavorites>>,
    reject_writes: AtomicBool,
    gate: watch::Sender<bool>,
    held: AtomicUsize,
    log: Mutex<Vec<WriteOp>>,
}

impl Default for LocalFavoriteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFavoriteStore {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);

        Self {
            users: Mutex::new(HashMap::new()),
            reject_writes: AtomicBool::new(false),
            gate,
            held: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Seed favorites for a user without going through the write path
    pub fn seed(&self, user_id: &str, items: impl IntoIterator<Item = ItemRecord>) {
        let mut users = self.users.lock();
        let user = users.entry(user_id.to_string()).or_default();

        for item in items {
            user.items.insert(item.id.clone(), Arc::new(item));
        }

        user.broadcast();
    }

    /// When set, every subsequent put/delete fails
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::Release);
    }

    /// Holds every write until [`Self::release_writes`] is called
    pub fn hold_writes(&self) {
        self.gate.send_replace(false);
    }

    pub fn release_writes(&self) {
        self.gate.send_replace(true);
    }

    /// Number of writes currently waiting behind the gate
    pub fn held_writes(&self) -> usize {
        self.held.load(Ordering::Acquire)
    }

    /// Polls until at least `count` writes are waiting behind the gate
    pub async fn wait_for_held_writes(&self, count: usize) {
        while self.held_writes() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Every accepted write so far
    pub fn writes(&self) -> Vec<WriteOp> {
        self.log.lock().clone()
    }

    pub fn subscriber_count(&self, user_id: &str) -> usize {
        let mut users = self.users.lock();

        match users.get_mut(user_id) {
            Some(user) => {
                user.subscribers.retain(|sink| !sink.is_closed());
                user.subscribers.len()
            }
            None => 0,
        }
    }

    /// Breaks every live subscription of the user with an error
    pub fn fail_subscriptions(&self, user_id: &str, reason: &str) {
        if let Some(user) = self.users.lock().get_mut(user_id) {
            for sink in user.subscribers.drain(..) {
                sink.fail(StoreError::SubscriptionClosed(reason.to_string()));
            }
        }
    }

    /// Ends every live subscription of the user without an error,
    /// as a server closing the stream would
    pub fn close_subscriptions(&self, user_id: &str) {
        if let Some(user) = self.users.lock().get_mut(user_id) {
            user.subscribers.clear();
        }
    }

    async fn pass_gate(&self) {
        let mut open = self.gate.subscribe();

        self.held.fetch_add(1, Ordering::AcqRel);
        // sender lives as long as self
        let _ = open.wait_for(|open| *open).await;
        self.held.fetch_sub(1, Ordering::AcqRel);
    }

    fn check_writable(&self, item_id: &str) -> Result<(), StoreError> {
        if self.reject_writes.load(Ordering::Acquire) {
            return Err(StoreError::Rejected {
                id: item_id.to_string(),
                reason: "writes disabled".to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl FavoriteStore for LocalFavoriteStore {
    async fn subscribe(&self, user_id: &str) -> Result<SnapshotStream, StoreError> {
        let (sink, stream) = snapshot_channel();
        let mut users = self.users.lock();
        let user = users.entry(user_id.to_string()).or_default();

        sink.deliver(user.items.clone());
        user.subscribers.push(sink);

        debug!(
            "Local favorites subscription {} opened for user {}",
            stream.id(),
            user_id
        );

        Ok(stream)
    }

    async fn put(&self, user_id: &str, item: &ItemRecord) -> Result<(), StoreError> {
        self.pass_gate().await;
        self.check_writable(&item.id)?;

        let mut users = self.users.lock();
        let user = users.entry(user_id.to_string()).or_default();

        user.items.insert(item.id.clone(), Arc::new(item.clone()));
        self.log.lock().push(WriteOp::Put(item.id.clone()));
        user.broadcast();

        Ok(())
    }

    async fn delete(&self, user_id: &str, item_id: &str) -> Result<(), StoreError> {
        self.pass_gate().await;
        self.check_writable(item_id)?;

        let mut users = self.users.lock();
        let user = users.entry(user_id.to_string()).or_default();

        user.items.remove(item_id);
        self.log.lock().push(WriteOp::Delete(item_id.to_string()));
        user.broadcast();

        Ok(())
    }

    async fn get(&self, user_id: &str, item_id: &str) -> Result<Option<ItemRecord>, StoreError> {
        Ok(self
            .users
            .lock()
            .get(user_id)
            .and_then(|user| user.items.get(item_id))
            .map(|item| item.as_ref().clone()))
    }
}
