use crate::app::config::{FavoritesConfig, FirestoreConfig};
use crate::core::models::item::{FIELD_ITEM_ID, FavoriteSet, ItemRecord};
use crate::core::tls;
use crate::core::store::store::{
    FavoriteStore, SnapshotSink, SnapshotStream, StoreError, snapshot_channel,
};
use async_trait::async_trait;
use firestore::{
    FirestoreDb, FirestoreDbOptions, FirestoreDocument, FirestoreListenEvent, FirestoreListener,
    FirestoreListenerTarget, FirestoreMemListenStateStorage,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Firestore TargetChangeType::Reset
/// Sent when the server can't resume from the client's token,
/// a full re-snapshot follows so we reload the whole collection
const TARGET_CHANGE_TYPE_RESET: i32 = 4;

/// Each subscription owns its own listener, so a single target id suffices
const LISTENER_TARGET_ID: u32 = 1;

/// Fields the firestore deserializer injects which are not part of the stored record
const FIRESTORE_META_PREFIX: &str = "_firestore_";

type Listener = FirestoreListener<FirestoreDb, FirestoreMemListenStateStorage>;

fn doc_id_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn decode_doc(doc: &FirestoreDocument) -> Result<ItemRecord, StoreError> {
    let mut body: Map<String, Value> =
        FirestoreDb::deserialize_doc_to(doc).map_err(|e| StoreError::Decode {
            doc: doc.name.clone(),
            reason: e.to_string(),
        })?;

    body.retain(|key, _| !key.starts_with(FIRESTORE_META_PREFIX));
    // the document name is authoritative for the id
    body.remove(FIELD_ITEM_ID);

    Ok(ItemRecord::new(doc_id_of(&doc.name), body))
}

/// Returns true if the set actually changed
fn upsert(current: &Mutex<FavoriteSet>, item: ItemRecord) -> bool {
    let item = Arc::new(item);
    let prev = current.lock().insert(item.id.clone(), item.clone());

    prev.as_deref() != Some(item.as_ref())
}

fn remove(current: &Mutex<FavoriteSet>, doc_path: &str) -> bool {
    current.lock().remove(doc_id_of(doc_path)).is_some()
}

/// Favorites stored as `{users}/{user_id}/{favorites}/{item_id}`,
/// each document body being the verbatim item record
#[derive(Clone)]
pub struct FirestoreFavoriteStore {
    db: Arc<FirestoreDb>,
    users_collection: String,
    favorites_collection: String,
}

impl FirestoreFavoriteStore {
    pub fn new(
        db: Arc<FirestoreDb>,
        users_collection: impl Into<String>,
        favorites_collection: impl Into<String>,
    ) -> Self {
        Self {
            db,
            users_collection: users_collection.into(),
            favorites_collection: favorites_collection.into(),
        }
    }

    /// Opens a firestore session, against the emulator when one is configured
    pub async fn connect(
        config: &FirestoreConfig,
        favorites: &FavoritesConfig,
    ) -> Result<Self, StoreError> {
        tls::install_crypto_provider();

        let mut options = FirestoreDbOptions::new(config.project_id.clone());

        if let Some(db_id) = &config.database_id {
            options = options.with_database_id(db_id.clone());
        }

        if let Some(host) = &config.emulator_host {
            debug!("Using firestore emulator at {}", host);
            options = options.with_firebase_api_url(format!("http://{}", host));
        }

        let db = match &config.credentials_path {
            Some(path) => {
                FirestoreDb::with_options_service_account_key_file(options, path.clone()).await?
            }
            None => FirestoreDb::with_options(options).await?,
        };

        Ok(Self::new(
            Arc::new(db),
            favorites.users_collection.clone(),
            favorites.favorites_collection.clone(),
        ))
    }

    async fn load(&self, user_id: &str) -> Result<FavoriteSet, StoreError> {
        let parent = self.db.parent_path(&self.users_collection, user_id)?;

        let docs = self
            .db
            .fluent()
            .select()
            .from(self.favorites_collection.as_str())
            .parent(&parent)
            .query()
            .await
            .map_err(|e| {
                error!(
                    "Firestore favorites query failed for user {}: {} ({:?})",
                    user_id, e, e
                );
                e
            })?;

        let mut set = FavoriteSet::with_capacity(docs.len());

        for doc in docs {
            match decode_doc(&doc) {
                Ok(item) => {
                    set.insert(item.id.clone(), Arc::new(item));
                }
                Err(err) => warn!("Skipping favorite during load: {}", err),
            }
        }

        debug!("Loaded {} favorites for user {}", set.len(), user_id);
        Ok(set)
    }

    fn spawn_listener(&self, user_id: String, current: Arc<Mutex<FavoriteSet>>, sink: SnapshotSink) {
        let store = self.clone();

        tokio::spawn(async move {
            let mut listener = match store
                .create_listener(&user_id, current, sink.clone())
                .await
            {
                Ok(listener) => listener,
                Err(err) => {
                    error!(
                        "Failed to start favorites listener for user {}: {}",
                        user_id, err
                    );
                    sink.fail(err);
                    return;
                }
            };

            debug!("Favorites listener {} running for user {}", sink.id(), user_id);
            sink.closed().await;
            debug!("Favorites subscription {} closed, stopping listener", sink.id());

            if let Err(err) = listener.shutdown().await {
                warn!("Favorites listener shutdown failed: {}", err);
            }
        });
    }

    async fn create_listener(
        &self,
        user_id: &str,
        current: Arc<Mutex<FavoriteSet>>,
        sink: SnapshotSink,
    ) -> Result<Listener, StoreError> {
        let parent = self.db.parent_path(&self.users_collection, user_id)?;

        let mut listener = self
            .db
            .create_listener(FirestoreMemListenStateStorage::new())
            .await?;

        self.db
            .fluent()
            .select()
            .from(self.favorites_collection.as_str())
            .parent(&parent)
            .listen()
            .add_target(FirestoreListenerTarget::new(LISTENER_TARGET_ID), &mut listener)?;

        let store = self.clone();
        let user_id = user_id.to_string();

        listener
            .start(move |event| {
                let store = store.clone();
                let current = current.clone();
                let sink = sink.clone();
                let user_id = user_id.clone();

                async move {
                    let changed = match event {
                        FirestoreListenEvent::DocumentChange(change) => match change.document {
                            Some(doc) => match decode_doc(&doc) {
                                Ok(item) => upsert(&current, item),
                                Err(err) => {
                                    warn!("Ignoring undecodable favorite change: {}", err);
                                    false
                                }
                            },
                            None => false,
                        },
                        FirestoreListenEvent::DocumentDelete(del) => remove(&current, &del.document),
                        FirestoreListenEvent::DocumentRemove(rem) => remove(&current, &rem.document),
                        FirestoreListenEvent::TargetChange(tc)
                            if tc.target_change_type == TARGET_CHANGE_TYPE_RESET =>
                        {
                            warn!("Favorites listener reset for user {}, reloading", user_id);
                            match store.load(&user_id).await {
                                Ok(set) => {
                                    *current.lock() = set;
                                    true
                                }
                                Err(err) => {
                                    warn!("Favorites reload failed for user {}: {}", user_id, err);
                                    false
                                }
                            }
                        }
                        _ => false,
                    };

                    if changed {
                        let snapshot = current.lock().clone();
                        sink.deliver(snapshot);
                    }

                    Ok(())
                }
            })
            .await?;

        Ok(listener)
    }
}

#[async_trait]
impl FavoriteStore for FirestoreFavoriteStore {
    async fn subscribe(&self, user_id: &str) -> Result<SnapshotStream, StoreError> {
        let (sink, stream) = snapshot_channel();

        let initial = self.load(user_id).await?;
        let current = Arc::new(Mutex::new(initial.clone()));
        sink.deliver(initial);

        self.spawn_listener(user_id.to_string(), current, sink);
        Ok(stream)
    }

    async fn put(&self, user_id: &str, item: &ItemRecord) -> Result<(), StoreError> {
        let parent = self.db.parent_path(&self.users_collection, user_id)?;

        let _: ItemRecord = self
            .db
            .fluent()
            .update()
            .in_col(&self.favorites_collection)
            .document_id(&item.id)
            .parent(&parent)
            .object(item)
            .execute()
            .await?;

        debug!("Stored favorite {} for user {}", item.id, user_id);
        Ok(())
    }

    async fn delete(&self, user_id: &str, item_id: &str) -> Result<(), StoreError> {
        let parent = self.db.parent_path(&self.users_collection, user_id)?;

        self.db
            .fluent()
            .delete()
            .from(self.favorites_collection.as_str())
            .document_id(item_id)
            .parent(&parent)
            .execute()
            .await?;

        debug!("Deleted favorite {} for user {}", item_id, user_id);
        Ok(())
    }

    async fn get(&self, user_id: &str, item_id: &str) -> Result<Option<ItemRecord>, StoreError> {
        let parent = self.db.parent_path(&self.users_collection, user_id)?;

        let doc = self
            .db
            .fluent()
            .select()
            .by_id_in(self.favorites_collection.as_str())
            .parent(&parent)
            .one(item_id)
            .await?;

        doc.as_ref().map(decode_doc).transpose()
    }
}
