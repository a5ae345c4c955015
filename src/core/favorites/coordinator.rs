use crate::core::favorites::cache::{FavoritesCache, Intent, IntentKind, Overlay};
use crate::core::models::item::ItemRecord;
use crate::core::store::{FavoriteStore, StoreError};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{Instrument, debug, debug_span, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// The item was written to the user's favorites
    Added,
    /// The item was deleted from the user's favorites
    Removed,
    /// Queued behind another toggle and the state it left
    /// behind already matched, nothing was written
    Unchanged,
    /// Queued and then replaced by a newer toggle for the same item
    Superseded,
    /// Nobody is signed in
    Skipped,
}

#[derive(Debug, Error)]
pub enum ToggleError {
    #[error("failed to {kind} favorite {id}: {source}")]
    Write {
        id: String,
        kind: IntentKind,
        #[source]
        source: StoreError,
    },
    #[error("toggle for user {requested} on favorites of user {owner}")]
    UserMismatch { requested: String, owner: String },
    #[error("toggle for {0} dropped before it resolved")]
    Abandoned(String),
}

type ToggleResult = Result<ToggleOutcome, ToggleError>;

struct QueuedToggle {
    intent: Intent,
    reply: oneshot::Sender<ToggleResult>,
}

/// In flight marker for one item id. At most one write per
/// id runs at a time, later toggles wait in `queued` where a
/// newer one replaces an older one.
#[derive(Default)]
struct PendingToggle {
    queued: Option<QueuedToggle>,
}

struct Dispatch {
    intent: Intent,
    /// Overlay visible before this write, restored if it fails
    prior: Option<Overlay>,
    /// Cache snapshot generation when the write began
    begun_at: u64,
    reply: oneshot::Sender<ToggleResult>,
}

struct Inner {
    user_id: String,
    store: Arc<dyn FavoriteStore>,
    cache: Arc<FavoritesCache>,
    pending: DashMap<String, PendingToggle>,
}

/// Serializes favorite toggles per item and applies them
/// optimistically to the cache.
///
/// Writes run on their own task, so a caller that goes away (e.g. an
/// unmounted screen) does not cancel the remote write. Its reply is
/// simply dropped while the shared cache is still updated.
#[derive(Clone)]
pub struct ToggleCoordinator {
    inner: Arc<Inner>,
}

impl ToggleCoordinator {
    pub fn new(store: Arc<dyn FavoriteStore>, cache: Arc<FavoritesCache>) -> Self {
        Self {
            inner: Arc::new(Inner {
                user_id: cache.user_id().to_string(),
                store,
                cache,
                pending: DashMap::new(),
            }),
        }
    }

    /// Flips the favorite state of `item` as currently shown by the cache.
    ///
    /// # Behavior
    /// The direction is decided now, at call time. A toggle arriving while
    /// another one for the same id is in flight is queued and dispatched
    /// once that resolves, against the state it left behind. Failed writes
    /// roll the optimistic change back and are returned as errors, without
    /// retrying. Without a signed in user this is a no-op.
    pub async fn toggle_favorite(&self, user_id: Option<&str>, item: ItemRecord) -> ToggleResult {
        let Some(user_id) = user_id else {
            debug!("No signed in user, skipping favorite toggle for {}", item.id);
            return Ok(ToggleOutcome::Skipped);
        };

        if user_id != self.inner.user_id {
            return Err(ToggleError::UserMismatch {
                requested: user_id.to_string(),
                owner: self.inner.user_id.clone(),
            });
        }

        let id = item.id.clone();
        let (reply, rx) = oneshot::channel();

        if let Some(dispatch) = self.inner.enqueue(item, reply) {
            let inner = self.inner.clone();
            let span = debug_span!("favorite_toggle", user_id = %inner.user_id, item_id = %id);

            tokio::spawn(inner.drive(id.clone(), dispatch).instrument(span));
        }

        rx.await.map_err(|_| ToggleError::Abandoned(id))?
    }

    /// Whether a write for `id` is currently in flight
    pub fn is_pending(&self, id: &str) -> bool {
        self.inner.pending.contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }
}

impl Inner {
    /// Records the toggle and applies its optimistic state. Returns the
    /// dispatch to run when no other toggle for the id is in flight.
    fn enqueue(&self, item: ItemRecord, reply: oneshot::Sender<ToggleResult>) -> Option<Dispatch> {
        let id = item.id.clone();

        match self.pending.entry(id.clone()) {
            Entry::Occupied(mut entry) => {
                let intent = self.cache.edit(|edit| {
                    let intent = Intent::toward(edit.contains(&id), item);
                    edit.begin(&id, &intent);
                    intent
                });

                debug!("Queued favorite {} for {} behind in flight write", intent.kind(), id);

                let queued = QueuedToggle { intent, reply };
                if let Some(prev) = entry.get_mut().queued.replace(queued) {
                    let _ = prev.reply.send(Ok(ToggleOutcome::Superseded));
                }

                None
            }
            Entry::Vacant(entry) => {
                let (intent, prior, begun_at) = self.cache.edit(|edit| {
                    let intent = Intent::toward(edit.contains(&id), item);
                    let prior = edit.begin(&id, &intent);
                    (intent, prior, edit.generation())
                });

                entry.insert(PendingToggle::default());

                Some(Dispatch {
                    intent,
                    prior,
                    begun_at,
                    reply,
                })
            }
        }
    }

    async fn drive(self: Arc<Self>, id: String, mut job: Dispatch) {
        loop {
            let result = self.write(&id, &job.intent).await;
            let (next, replies) = self.resolve(&id, &job, result.as_ref().err());

            let outcome = match result {
                Ok(()) => Ok(match job.intent.kind() {
                    IntentKind::Add => ToggleOutcome::Added,
                    IntentKind::Remove => ToggleOutcome::Removed,
                }),
                Err(source) => Err(ToggleError::Write {
                    id: id.clone(),
                    kind: job.intent.kind(),
                    source,
                }),
            };

            // receivers may be gone if the caller was dropped, that's fine
            let _ = job.reply.send(outcome);
            for (reply, outcome) in replies {
                let _ = reply.send(Ok(outcome));
            }

            match next {
                Some(dispatch) => job = dispatch,
                None => break,
            }
        }
    }

    async fn write(&self, id: &str, intent: &Intent) -> Result<(), StoreError> {
        let result = match intent {
            Intent::Add(item) => self.store.put(&self.user_id, item).await,
            Intent::Remove => self.store.delete(&self.user_id, id).await,
        };

        match &result {
            Ok(()) => debug!("Favorite {} for {} acknowledged", intent.kind(), id),
            Err(err) => error!("Favorite {} for {} failed: {}", intent.kind(), id, err),
        }

        result
    }

    /// Applies the result of a finished write to the cache and picks up the
    /// queued toggle, if any, against the post-resolution state
    fn resolve(
        &self,
        id: &str,
        job: &Dispatch,
        failure: Option<&StoreError>,
    ) -> (Option<Dispatch>, Vec<(oneshot::Sender<ToggleResult>, ToggleOutcome)>) {
        let mut replies = Vec::new();

        let Entry::Occupied(mut entry) = self.pending.entry(id.to_string()) else {
            return (None, replies);
        };

        let queued = entry.get_mut().queued.take();

        let next = self.cache.edit(|edit| {
            match failure {
                None => edit.settle(id, &job.intent, job.begun_at),
                Some(_) => edit.restore(id, job.prior.clone()),
            }

            let queued = queued?;

            if !queued.intent.needs_write(edit.current(id).as_ref()) {
                debug!("Queued favorite {} for {} already satisfied", queued.intent.kind(), id);
                replies.push((queued.reply, ToggleOutcome::Unchanged));
                return None;
            }

            let prior = edit.begin(id, &queued.intent);
            Some(Dispatch {
                intent: queued.intent,
                prior,
                begun_at: edit.generation(),
                reply: queued.reply,
            })
        });

        if next.is_none() {
            entry.remove();
        }

        (next, replies)
    }
}
