use crate::core::favorites::cache::{FavoritesCache, FavoritesView};
use crate::core::favorites::coordinator::{ToggleCoordinator, ToggleError, ToggleOutcome};
use crate::core::models::item::ItemRecord;
use crate::core::store::{FavoriteStore, SnapshotStream, StoreError};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Keeps one user's [`FavoritesCache`] in step with the remote store.
///
/// Owns the live subscription feeding the cache and the coordinator
/// writing through to the store. Every screen can attach its own
/// instance, independent instances for one user converge once the
/// store has delivered the same snapshot to each of them.
pub struct FavoritesSync {
    store: Arc<dyn FavoriteStore>,
    cache: Arc<FavoritesCache>,
    coordinator: ToggleCoordinator,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl FavoritesSync {
    /// Subscribes for `user_id` and waits for the initial snapshot, so
    /// the returned cache already mirrors the remote set
    pub async fn attach(
        store: Arc<dyn FavoriteStore>,
        user_id: impl Into<String>,
    ) -> Result<Arc<Self>, StoreError> {
        let cache = Arc::new(FavoritesCache::new(user_id));
        let coordinator = ToggleCoordinator::new(store.clone(), cache.clone());

        let sync = Arc::new(Self {
            store,
            cache,
            coordinator,
            pump: Mutex::new(None),
        });

        sync.subscribe().await?;
        info!(
            "Favorites attached for user {} with {} items",
            sync.user_id(),
            sync.cache.len()
        );

        Ok(sync)
    }

    pub fn user_id(&self) -> &str {
        self.cache.user_id()
    }

    pub fn cache(&self) -> &Arc<FavoritesCache> {
        &self.cache
    }

    /// New read only binding for a screen
    pub fn view(&self) -> FavoritesView {
        self.cache.view()
    }

    pub fn is_favorite(&self, id: &str) -> bool {
        self.cache.contains(id)
    }

    /// Existence check straight against the store, bypassing the cache
    pub async fn is_favorite_remote(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.store.get(self.user_id(), id).await?.is_some())
    }

    pub async fn toggle_favorite(
        &self,
        user_id: Option<&str>,
        item: ItemRecord,
    ) -> Result<ToggleOutcome, ToggleError> {
        self.coordinator.toggle_favorite(user_id, item).await
    }

    pub fn coordinator(&self) -> &ToggleCoordinator {
        &self.coordinator
    }

    /// Opens a fresh subscription, e.g. after the cache went stale.
    /// Deliveries from the previous subscription are ignored from here on.
    pub async fn resubscribe(&self) -> Result<(), StoreError> {
        debug!("Resubscribing favorites for user {}", self.user_id());
        self.subscribe().await
    }

    pub fn is_attached(&self) -> bool {
        self.pump
            .lock()
            .as_ref()
            .is_some_and(|pump| !pump.is_finished())
    }

    /// Tears down the subscription. No snapshot is applied after this
    /// returns, toggles already in flight still complete.
    pub fn detach(&self) {
        self.cache.close_epoch();

        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
            debug!("Favorites detached for user {}", self.user_id());
        }
    }

    async fn subscribe(&self) -> Result<(), StoreError> {
        let epoch = self.cache.open_epoch();
        let mut stream = self.store.subscribe(self.user_id()).await?;

        match stream.next().await {
            Some(Ok(snapshot)) => {
                self.cache.apply_snapshot(epoch, snapshot);
            }
            Some(Err(err)) => {
                self.cache.mark_stale(epoch);
                return Err(err);
            }
            None => {
                self.cache.mark_stale(epoch);
                return Err(StoreError::SubscriptionClosed(
                    "closed before initial snapshot".to_string(),
                ));
            }
        }

        let pump = tokio::spawn(pump_snapshots(stream, self.cache.clone(), epoch));

        if let Some(prev) = self.pump.lock().replace(pump) {
            prev.abort();
        }

        Ok(())
    }
}

impl Drop for FavoritesSync {
    fn drop(&mut self) {
        self.detach();
    }
}

async fn pump_snapshots(mut stream: SnapshotStream, cache: Arc<FavoritesCache>, epoch: u64) {
    while let Some(next) = stream.next().await {
        match next {
            Ok(snapshot) => {
                if !cache.apply_snapshot(epoch, snapshot) {
                    return;
                }
            }
            Err(err) => {
                warn!(
                    "Favorites subscription {} for user {} failed: {}",
                    stream.id(),
                    cache.user_id(),
                    err
                );
                cache.mark_stale(epoch);
                return;
            }
        }
    }

    warn!(
        "Favorites subscription {} for user {} ended",
        stream.id(),
        cache.user_id()
    );
    cache.mark_stale(epoch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::item::ItemRecordBuilder;
    use crate::core::search::{SearchProvider, StaticSearch};
    use crate::core::store::LocalFavoriteStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::time::Duration;

    const USER: &str = "u1";

    fn item(id: &str) -> ItemRecord {
        ItemRecordBuilder::default().id(id).build().unwrap()
    }

    fn key_set(sync: &FavoritesSync) -> BTreeSet<String> {
        sync.cache().snapshot().keys().cloned().collect()
    }

    /// Another device removes every favorite right after it is written,
    /// and the ack for the write reaches us only after both changes
    struct RacingDeviceStore {
        inner: Arc<LocalFavoriteStore>,
    }

    #[async_trait]
    impl FavoriteStore for RacingDeviceStore {
        async fn subscribe(&self, user_id: &str) -> Result<SnapshotStream, StoreError> {
            self.inner.subscribe(user_id).await
        }

        async fn put(&self, user_id: &str, item: &ItemRecord) -> Result<(), StoreError> {
            self.inner.put(user_id, item).await?;
            self.inner.delete(user_id, &item.id).await?;
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        }

        async fn delete(&self, user_id: &str, item_id: &str) -> Result<(), StoreError> {
            self.inner.delete(user_id, item_id).await
        }

        async fn get(&self, user_id: &str, item_id: &str) -> Result<Option<ItemRecord>, StoreError> {
            self.inner.get(user_id, item_id).await
        }
    }

    async fn eventually(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_attach_mirrors_existing_favorites() {
        let store = Arc::new(LocalFavoriteStore::new());
        store.seed(USER, vec![item("a"), item("b")]);

        let sync = FavoritesSync::attach(store.clone(), USER).await.unwrap();

        let expected: BTreeSet<String> = ["a", "b"].map(String::from).into();
        assert!(sync.cache().is_ready());
        assert_eq!(key_set(&sync), expected);
        assert!(sync.is_attached());
    }

    #[tokio::test]
    async fn test_add_then_remove_scenario() {
        let store = Arc::new(LocalFavoriteStore::new());
        let sync = FavoritesSync::attach(store.clone(), USER).await.unwrap();

        let added = sync.toggle_favorite(Some(USER), item("abc123")).await.unwrap();
        assert_eq!(added, ToggleOutcome::Added);
        assert!(sync.is_favorite("abc123"));
        assert!(sync.is_favorite_remote("abc123").await.unwrap());

        let removed = sync.toggle_favorite(Some(USER), item("abc123")).await.unwrap();
        assert_eq!(removed, ToggleOutcome::Removed);
        assert!(!sync.is_favorite("abc123"));
        assert!(store.get(USER, "abc123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_independent_subscriptions_converge() {
        let store = Arc::new(LocalFavoriteStore::new());
        let list_screen = FavoritesSync::attach(store.clone(), USER).await.unwrap();
        let favorites_screen = FavoritesSync::attach(store.clone(), USER).await.unwrap();

        for id in ["a", "b", "c"] {
            list_screen.toggle_favorite(Some(USER), item(id)).await.unwrap();
        }
        favorites_screen.toggle_favorite(Some(USER), item("b")).await.unwrap();
        list_screen.toggle_favorite(Some(USER), item("d")).await.unwrap();

        let expected: BTreeSet<String> = ["a", "c", "d"].map(String::from).into();
        eventually(|| key_set(&list_screen) == expected && key_set(&favorites_screen) == expected)
            .await;
    }

    #[tokio::test]
    async fn test_search_and_snapshot_records_share_identity() {
        let store = Arc::new(LocalFavoriteStore::new());
        let stored = ItemRecord::from_value(json!({
            "id": "X",
            "volumeInfo": { "title": "Old cached title" }
        }))
        .unwrap();
        store.seed(USER, vec![stored]);

        let sync = FavoritesSync::attach(store.clone(), USER).await.unwrap();
        let search = StaticSearch::new(vec![
            ItemRecord::from_value(json!({
                "id": "X",
                "volumeInfo": { "title": "Fresh title" }
            }))
            .unwrap(),
        ]);

        let results = search.search("anything").await.unwrap();
        assert!(sync.is_favorite(&results[0].id));

        // toggling the fresh copy unfavorites the stored one
        let outcome = sync.toggle_favorite(Some(USER), results[0].clone()).await.unwrap();
        assert_eq!(outcome, ToggleOutcome::Removed);
        assert!(!sync.is_favorite("X"));
    }

    #[tokio::test]
    async fn test_empty_search_leaves_cache_untouched() {
        let store = Arc::new(LocalFavoriteStore::new());
        store.seed(USER, vec![item("a")]);
        let sync = FavoritesSync::attach(store.clone(), USER).await.unwrap();
        let before = sync.cache().snapshot();

        let results = StaticSearch::new(vec![]).search("zzzz").await.unwrap();

        assert!(results.is_empty());
        assert_eq!(*sync.cache().snapshot(), *before);
    }

    #[tokio::test]
    async fn test_subscription_failure_keeps_stale_data_then_recovers() {
        let store = Arc::new(LocalFavoriteStore::new());
        store.seed(USER, vec![item("a")]);
        let sync = FavoritesSync::attach(store.clone(), USER).await.unwrap();

        store.fail_subscriptions(USER, "permission revoked");
        eventually(|| sync.cache().is_stale()).await;

        assert!(sync.is_favorite("a"));
        assert!(!sync.is_attached());

        store.seed(USER, vec![item("b")]);
        sync.resubscribe().await.unwrap();

        assert!(!sync.cache().is_stale());
        assert!(sync.is_favorite("b"));
    }

    #[tokio::test]
    async fn test_detach_stops_deliveries() {
        let store = Arc::new(LocalFavoriteStore::new());
        let sync = FavoritesSync::attach(store.clone(), USER).await.unwrap();
        assert_eq!(store.subscriber_count(USER), 1);

        sync.detach();
        store.seed(USER, vec![item("late")]);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!sync.is_favorite("late"));
        assert!(!sync.cache().is_stale());
        assert_eq!(store.subscriber_count(USER), 0);
    }

    #[tokio::test]
    async fn test_write_completes_after_originating_screen_detached() {
        let store = Arc::new(LocalFavoriteStore::new());
        let detail_screen = FavoritesSync::attach(store.clone(), USER).await.unwrap();
        let list_screen = FavoritesSync::attach(store.clone(), USER).await.unwrap();
        let mut list_view = list_screen.view();

        store.hold_writes();
        let toggle = {
            let screen = detail_screen.clone();
            tokio::spawn(async move { screen.toggle_favorite(Some(USER), item("a")).await })
        };
        store.wait_for_held_writes(1).await;

        // detail screen unmounts mid write
        detail_screen.detach();
        toggle.abort();
        drop(detail_screen);

        store.release_writes();

        let seen = tokio::time::timeout(Duration::from_secs(2), list_view.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(seen.contains_key("a"));
        assert!(store.get(USER, "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_views_see_remote_changes() {
        let store = Arc::new(LocalFavoriteStore::new());
        let sync = FavoritesSync::attach(store.clone(), USER).await.unwrap();
        let mut view = sync.view();

        store.put(USER, &item("remote")).await.unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(2), view.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(seen.contains_key("remote"));
    }

    #[tokio::test]
    async fn test_remote_change_before_ack_wins() {
        let store = Arc::new(LocalFavoriteStore::new());
        let racing = Arc::new(RacingDeviceStore {
            inner: store.clone(),
        });
        let this_device = FavoritesSync::attach(racing, USER).await.unwrap();
        let other_screen = FavoritesSync::attach(store.clone(), USER).await.unwrap();

        let outcome = this_device.toggle_favorite(Some(USER), item("x")).await.unwrap();
        assert_eq!(outcome, ToggleOutcome::Added);

        assert!(store.get(USER, "x").await.unwrap().is_none());
        eventually(|| key_set(&this_device).is_empty() && key_set(&other_screen).is_empty()).await;
    }

    #[tokio::test]
    async fn test_ended_subscription_marks_stale() {
        let store = Arc::new(LocalFavoriteStore::new());
        store.seed(USER, vec![item("a")]);
        let sync = FavoritesSync::attach(store.clone(), USER).await.unwrap();

        store.close_subscriptions(USER);
        eventually(|| sync.cache().is_stale()).await;

        assert!(sync.is_favorite("a"));
        assert!(!sync.is_attached());
    }
}
