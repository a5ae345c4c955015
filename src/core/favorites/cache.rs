use crate::core::models::item::{FavoriteSet, ItemRecord};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use strum::Display;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum IntentKind {
    Add,
    Remove,
}

/// Target membership of a single toggle
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Add(Arc<ItemRecord>),
    Remove,
}

impl Intent {
    /// The opposite of the membership the user currently sees
    pub fn toward(present: bool, item: ItemRecord) -> Self {
        if present {
            Intent::Remove
        } else {
            Intent::Add(Arc::new(item))
        }
    }

    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::Add(_) => IntentKind::Add,
            Intent::Remove => IntentKind::Remove,
        }
    }

    /// Whether membership alone already matches this intent
    pub fn is_satisfied_by(&self, present: bool) -> bool {
        matches!((self, present), (Intent::Add(_), true) | (Intent::Remove, false))
    }

    /// Whether the given current record differs from what this intent
    /// would leave behind. An add with a different payload still needs
    /// writing, the latest supplied payload is the one persisted
    pub fn needs_write(&self, current: Option<&Arc<ItemRecord>>) -> bool {
        match self {
            Intent::Add(item) => current.is_none_or(|cur| cur.as_ref() != item.as_ref()),
            Intent::Remove => current.is_some(),
        }
    }

    fn apply(&self, id: &str, set: &mut FavoriteSet) {
        match self {
            Intent::Add(item) => {
                set.insert(id.to_string(), item.clone());
            }
            Intent::Remove => {
                set.remove(id);
            }
        }
    }
}

/// Provisional local state layered over the confirmed snapshot
#[derive(Debug, Clone)]
pub(crate) struct Overlay {
    intent: Intent,
    /// Snapshot generation at which the backing write succeeded,
    /// None while the write is still in flight
    settled_at: Option<u64>,
}

#[derive(Default)]
struct CacheState {
    /// Last snapshot delivered by the subscription, replaced wholesale
    confirmed: FavoriteSet,
    overlays: HashMap<String, Overlay>,
    generation: u64,
    /// Bumped on every (re)subscribe and detach so deliveries
    /// from a torn down subscription are ignored
    epoch: u64,
}

impl CacheState {
    fn materialize(&self) -> FavoriteSet {
        let mut view = self.confirmed.clone();

        for (id, overlay) in &self.overlays {
            overlay.intent.apply(id, &mut view);
        }

        view
    }

    /// Drops settled overlays once the snapshot agrees with them. An overlay
    /// only settles when no snapshot arrived during its write, so it survives
    /// one disagreeing snapshot which may predate the write landing, after
    /// that the remote state wins.
    fn reconcile(&mut self) {
        let CacheState {
            confirmed,
            overlays,
            generation,
            ..
        } = self;

        overlays.retain(|id, overlay| match overlay.settled_at {
            None => true,
            Some(at) => {
                let agrees = overlay.intent.is_satisfied_by(confirmed.contains_key(id));
                !agrees && *generation <= at + 1
            }
        });
    }
}

/// Local read model of one user's favorites.
///
/// Reads are lock free against the last materialized view, which is the
/// confirmed remote snapshot with any optimistic toggles layered on top.
/// Only the sync engine writes to it, views get a [`FavoritesView`].
pub struct FavoritesCache {
    user_id: String,
    state: Mutex<CacheState>,
    view: ArcSwap<FavoriteSet>,
    changes: watch::Sender<Arc<FavoriteSet>>,
    ready: AtomicBool,
    stale: AtomicBool,
}

impl FavoritesCache {
    pub fn new(user_id: impl Into<String>) -> Self {
        let (changes, _) = watch::channel(Arc::new(FavoriteSet::new()));

        Self {
            user_id: user_id.into(),
            state: Mutex::new(CacheState::default()),
            view: ArcSwap::from_pointee(FavoriteSet::new()),
            changes,
            ready: AtomicBool::new(false),
            stale: AtomicBool::new(false),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn contains(&self, id: &str) -> bool {
        self.view.load().contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ItemRecord>> {
        self.view.load().get(id).cloned()
    }

    /// The full current mapping
    pub fn snapshot(&self) -> Arc<FavoriteSet> {
        self.view.load_full()
    }

    /// Current favorites ordered by id, for listing screens
    pub fn items(&self) -> Vec<Arc<ItemRecord>> {
        let view = self.view.load();
        let mut items: Vec<Arc<ItemRecord>> = view.values().cloned().collect();

        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    pub fn len(&self) -> usize {
        self.view.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.load().is_empty()
    }

    /// True once the first snapshot has been applied
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// True when the subscription failed and the mapping
    /// is the last one known rather than a live one
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// A read only binding that is notified with the full
    /// mapping whenever it changes
    pub fn view(self: &Arc<Self>) -> FavoritesView {
        FavoritesView {
            cache: self.clone(),
            rx: self.changes.subscribe(),
        }
    }

    pub fn view_count(&self) -> usize {
        self.changes.receiver_count()
    }

    /// Starts a new subscription epoch, returning its token
    pub(crate) fn open_epoch(&self) -> u64 {
        let mut state = self.state.lock();
        state.epoch += 1;
        state.epoch
    }

    /// Invalidates the current subscription epoch
    pub(crate) fn close_epoch(&self) {
        self.state.lock().epoch += 1;
    }

    /// Replaces the confirmed mapping with a full snapshot. Returns false
    /// if the snapshot belongs to a subscription that is no longer current.
    pub(crate) fn apply_snapshot(&self, epoch: u64, snapshot: FavoriteSet) -> bool {
        let mut state = self.state.lock();

        if state.epoch != epoch {
            debug!(
                "Dropping favorites snapshot from retired subscription for user {}",
                self.user_id
            );
            return false;
        }

        state.generation += 1;
        state.confirmed = snapshot;
        state.reconcile();

        let first = !self.ready.swap(true, Ordering::AcqRel);
        if self.stale.swap(false, Ordering::AcqRel) {
            debug!("Favorites for user {} fresh again", self.user_id);
        }

        debug!(
            "Applied favorites snapshot {} for user {}: {} confirmed, {} provisional",
            state.generation,
            self.user_id,
            state.confirmed.len(),
            state.overlays.len()
        );

        self.publish(&state, first);
        true
    }

    /// Keeps the last known mapping but flags it as stale
    pub(crate) fn mark_stale(&self, epoch: u64) {
        let state = self.state.lock();

        if state.epoch == epoch && !self.stale.swap(true, Ordering::AcqRel) {
            warn!(
                "Favorites for user {} are stale, keeping last snapshot of {} items",
                self.user_id,
                state.confirmed.len()
            );
        }
    }

    /// Runs an optimistic edit under the state lock and
    /// republishes the view once afterwards
    pub(crate) fn edit<R>(&self, f: impl FnOnce(&mut OverlayEdit<'_>) -> R) -> R {
        let mut state = self.state.lock();
        let result = f(&mut OverlayEdit { state: &mut state });

        self.publish(&state, false);
        result
    }

    fn publish(&self, state: &CacheState, force: bool) {
        let view = Arc::new(state.materialize());
        let prev = self.view.swap(view.clone());

        if force || *prev != *view {
            self.changes.send_replace(view);
        }
    }
}

/// Optimistic edits applied by the toggle coordinator
pub(crate) struct OverlayEdit<'a> {
    state: &'a mut CacheState,
}

impl OverlayEdit<'_> {
    /// The record currently visible for `id`
    pub(crate) fn current(&self, id: &str) -> Option<Arc<ItemRecord>> {
        match self.state.overlays.get(id) {
            Some(overlay) => match &overlay.intent {
                Intent::Add(item) => Some(item.clone()),
                Intent::Remove => None,
            },
            None => self.state.confirmed.get(id).cloned(),
        }
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.current(id).is_some()
    }

    /// Shows `intent` as in flight, returning the overlay it replaced
    pub(crate) fn begin(&mut self, id: &str, intent: &Intent) -> Option<Overlay> {
        self.state.overlays.insert(
            id.to_string(),
            Overlay {
                intent: intent.clone(),
                settled_at: None,
            },
        )
    }

    /// Snapshot generation the cache is at, taken when a write begins
    pub(crate) fn generation(&self) -> u64 {
        self.state.generation
    }

    /// Marks the write behind `intent`, begun at snapshot generation
    /// `begun_at`, as acknowledged. Once a snapshot arrived while the
    /// write was in flight the confirmed set already reflects it and wins.
    pub(crate) fn settle(&mut self, id: &str, intent: &Intent, begun_at: u64) {
        let moved_on = self.state.generation != begun_at;

        if moved_on || !intent.needs_write(self.state.confirmed.get(id)) {
            self.state.overlays.remove(id);
            return;
        }

        let settled_at = Some(self.state.generation);
        self.state.overlays.insert(
            id.to_string(),
            Overlay {
                intent: intent.clone(),
                settled_at,
            },
        );
    }

    /// Puts back the overlay that was visible before a failed write
    pub(crate) fn restore(&mut self, id: &str, prior: Option<Overlay>) {
        match prior {
            Some(overlay) => {
                self.state.overlays.insert(id.to_string(), overlay);
            }
            None => {
                self.state.overlays.remove(id);
            }
        }
    }
}

/// Read only binding held by a screen. Dropping it unsubscribes.
pub struct FavoritesView {
    cache: Arc<FavoritesCache>,
    rx: watch::Receiver<Arc<FavoriteSet>>,
}

impl FavoritesView {
    pub fn current(&self) -> Arc<FavoriteSet> {
        self.rx.borrow().clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rx.borrow().contains_key(id)
    }

    /// Waits for the next change and returns the full mapping
    pub async fn changed(&mut self) -> Option<Arc<FavoriteSet>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    pub fn is_ready(&self) -> bool {
        self.cache.is_ready()
    }

    pub fn is_stale(&self) -> bool {
        self.cache.is_stale()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::item::{ItemRecordBuilder, favorite_set};
    use serde_json::json;

    fn item(id: &str) -> ItemRecord {
        ItemRecordBuilder::default().id(id).build().unwrap()
    }

    fn keys(set: &FavoriteSet) -> Vec<String> {
        let mut keys: Vec<String> = set.keys().cloned().collect();
        keys.sort();
        keys
    }

    #[test]
    fn test_snapshot_replaces_wholesale() {
        let cache = FavoritesCache::new("u1");
        let epoch = cache.open_epoch();

        assert!(!cache.is_ready());
        cache.apply_snapshot(epoch, favorite_set(vec![item("a"), item("b")]));
        cache.apply_snapshot(epoch, favorite_set(vec![item("c")]));

        assert!(cache.is_ready());
        assert_eq!(keys(&cache.snapshot()), vec!["c"]);
        assert!(!cache.contains("a"));
    }

    #[test]
    fn test_retired_epoch_is_ignored() {
        let cache = FavoritesCache::new("u1");
        let old = cache.open_epoch();
        let current = cache.open_epoch();

        assert!(!cache.apply_snapshot(old, favorite_set(vec![item("a")])));
        assert!(cache.apply_snapshot(current, favorite_set(vec![item("b")])));

        cache.close_epoch();
        assert!(!cache.apply_snapshot(current, FavoriteSet::new()));
        assert!(cache.contains("b"));
    }

    #[test]
    fn test_stale_keeps_last_snapshot_until_fresh() {
        let cache = FavoritesCache::new("u1");
        let epoch = cache.open_epoch();
        cache.apply_snapshot(epoch, favorite_set(vec![item("a")]));

        cache.mark_stale(epoch);
        assert!(cache.is_stale());
        assert!(cache.contains("a"));

        let epoch = cache.open_epoch();
        cache.apply_snapshot(epoch, favorite_set(vec![item("a"), item("b")]));
        assert!(!cache.is_stale());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_in_flight_overlay_survives_snapshots_and_restores() {
        let cache = FavoritesCache::new("u1");
        let epoch = cache.open_epoch();
        cache.apply_snapshot(epoch, FavoriteSet::new());

        let prior = cache.edit(|edit| edit.begin("a", &Intent::toward(false, item("a"))));
        assert!(prior.is_none());
        assert!(cache.contains("a"));

        cache.apply_snapshot(epoch, favorite_set(vec![item("z")]));
        assert!(cache.contains("a"));
        assert!(cache.contains("z"));

        cache.edit(|edit| edit.restore("a", prior));
        assert!(!cache.contains("a"));
        assert!(cache.contains("z"));
    }

    #[test]
    fn test_settled_overlay_dropped_when_snapshot_agrees() {
        let cache = FavoritesCache::new("u1");
        let epoch = cache.open_epoch();
        cache.apply_snapshot(epoch, FavoriteSet::new());

        let intent = Intent::toward(false, item("a"));
        cache.edit(|edit| {
            let begun_at = edit.generation();
            edit.begin("a", &intent);
            edit.settle("a", &intent, begun_at);
        });
        assert!(cache.contains("a"));

        cache.apply_snapshot(epoch, favorite_set(vec![item("a")]));
        cache.apply_snapshot(epoch, FavoriteSet::new());

        // overlay gone, remote removal from elsewhere is visible
        assert!(!cache.contains("a"));
    }

    #[test]
    fn test_settled_overlay_yields_after_one_disagreeing_snapshot() {
        let cache = FavoritesCache::new("u1");
        let epoch = cache.open_epoch();
        cache.apply_snapshot(epoch, FavoriteSet::new());

        let intent = Intent::toward(false, item("a"));
        cache.edit(|edit| {
            let begun_at = edit.generation();
            edit.settle("a", &intent, begun_at)
        });

        cache.apply_snapshot(epoch, FavoriteSet::new());
        assert!(cache.contains("a"));

        cache.apply_snapshot(epoch, FavoriteSet::new());
        assert!(!cache.contains("a"));
    }

    #[test]
    fn test_settle_matching_confirmed_drops_overlay() {
        let cache = FavoritesCache::new("u1");
        let epoch = cache.open_epoch();
        cache.apply_snapshot(epoch, FavoriteSet::new());

        cache.edit(|edit| {
            let begun_at = edit.generation();
            edit.settle("gone", &Intent::Remove, begun_at)
        });
        cache.apply_snapshot(epoch, favorite_set(vec![item("gone")]));

        assert!(cache.contains("gone"));
    }

    #[test]
    fn test_snapshot_during_write_makes_confirmed_authoritative() {
        let cache = FavoritesCache::new("u1");
        let epoch = cache.open_epoch();
        cache.apply_snapshot(epoch, FavoriteSet::new());

        let intent = Intent::toward(false, item("x"));
        let begun_at = cache.edit(|edit| {
            let begun_at = edit.generation();
            edit.begin("x", &intent);
            begun_at
        });

        // our add lands, then another device removes it, all before the ack
        cache.apply_snapshot(epoch, favorite_set(vec![item("x")]));
        cache.apply_snapshot(epoch, FavoriteSet::new());
        assert!(cache.contains("x"));

        cache.edit(|edit| edit.settle("x", &intent, begun_at));

        assert!(!cache.contains("x"));
    }

    #[test]
    fn test_needs_write_compares_payload() {
        let stored = Arc::new(item("a"));
        let fresh = ItemRecord::from_value(json!({ "id": "a", "etag": "2" })).unwrap();

        assert!(Intent::Add(Arc::new(fresh)).needs_write(Some(&stored)));
        assert!(!Intent::Add(stored.clone()).needs_write(Some(&stored)));
        assert!(Intent::Remove.needs_write(Some(&stored)));
        assert!(!Intent::Remove.needs_write(None));
    }

    #[test]
    fn test_items_sorted_by_id() {
        let cache = FavoritesCache::new("u1");
        let epoch = cache.open_epoch();
        cache.apply_snapshot(epoch, favorite_set(vec![item("c"), item("a"), item("b")]));

        let ids: Vec<String> = cache.items().iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_views_notified_on_change_only() {
        let cache = Arc::new(FavoritesCache::new("u1"));
        let epoch = cache.open_epoch();
        let mut view = cache.view();

        cache.apply_snapshot(epoch, FavoriteSet::new());
        let first = view.changed().await.unwrap();
        assert!(first.is_empty());
        assert!(view.is_ready());

        cache.apply_snapshot(epoch, FavoriteSet::new());
        cache.apply_snapshot(epoch, favorite_set(vec![item("a")]));

        let next = view.changed().await.unwrap();
        assert!(next.contains_key("a"));
        assert!(view.contains("a"));
    }

    #[test]
    fn test_dropped_view_unsubscribes() {
        let cache = Arc::new(FavoritesCache::new("u1"));
        let view = cache.view();
        let _other = cache.view();

        assert_eq!(cache.view_count(), 2);
        drop(view);
        assert_eq!(cache.view_count(), 1);
    }
}
