use crate::core::models::item::{FavoriteSet, ItemRecord};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("favorite store unavailable: {0}")]
    Unavailable(String),
    #[error("write rejected for item {id}: {reason}")]
    Rejected { id: String, reason: String },
    #[error("failed to decode favorite document {doc}: {reason}")]
    Decode { doc: String, reason: String },
    #[error("favorites subscription closed: {0}")]
    SubscriptionClosed(String),
    #[error("firestore error: {0}")]
    Firestore(#[from] firestore::errors::FirestoreError),
}

pub type SnapshotResult = Result<FavoriteSet, StoreError>;

/// Receiving half of a live favorites subscription. Every item is
/// the complete favorite set of the user at that point in time, never
/// a delta. Dropping or closing the stream unsubscribes.
pub struct SnapshotStream {
    id: Uuid,
    rx: mpsc::UnboundedReceiver<SnapshotResult>,
}

/// Sending half held by the store implementation
#[derive(Clone)]
pub struct SnapshotSink {
    id: Uuid,
    tx: mpsc::UnboundedSender<SnapshotResult>,
}

/// Creates a connected sink and stream pair
pub fn snapshot_channel() -> (SnapshotSink, SnapshotStream) {
    let id = Uuid::new_v4();
    let (tx, rx) = mpsc::unbounded_channel();

    (SnapshotSink { id, tx }, SnapshotStream { id, rx })
}

impl SnapshotStream {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Waits for the next snapshot. None once the store side is gone
    /// or the stream was closed
    pub async fn next(&mut self) -> Option<SnapshotResult> {
        self.rx.recv().await
    }
}

impl SnapshotSink {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Pushes a full snapshot, returns false if the subscriber is gone
    pub fn deliver(&self, set: FavoriteSet) -> bool {
        self.tx.send(Ok(set)).is_ok()
    }

    /// Terminal failure of the subscription
    pub fn fail(&self, err: StoreError) -> bool {
        self.tx.send(Err(err)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the subscriber dropped or closed its stream
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Remote, per user favorites backend
#[async_trait]
pub trait FavoriteStore: Send + Sync {
    /// Opens a live subscription. The current full set is delivered
    /// first, followed by a full set after every change
    async fn subscribe(&self, user_id: &str) -> Result<SnapshotStream, StoreError>;

    /// Upserts the full record under `(user_id, item.id)`
    async fn put(&self, user_id: &str, item: &ItemRecord) -> Result<(), StoreError>;

    /// Removes a favorite, absent ids are not an error
    async fn delete(&self, user_id: &str, item_id: &str) -> Result<(), StoreError>;

    /// Point lookup outside of any subscription
    async fn get(&self, user_id: &str, item_id: &str) -> Result<Option<ItemRecord>, StoreError>;
}
