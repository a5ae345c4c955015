use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Field every favoritable record must carry
pub const FIELD_ITEM_ID: &str = "id";

/// A single book result, as returned by search and
/// as stored in a user's favorites.
///
/// Only `id` is meaningful to the sync engine, the rest of the
/// record is kept verbatim so a favorited item stays fully
/// viewable even when search no longer returns it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Builder)]
#[builder(setter(into))]
pub struct ItemRecord {
    pub id: String,
    #[serde(flatten)]
    #[builder(default)]
    pub payload: Map<String, Value>,
}

impl ItemRecord {
    pub fn new(id: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    /// Builds a record from a raw json object, e.g. a google books
    /// volume. Returns None when the value is not an object or
    /// has no usable string `id`
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut payload) = value else {
            return None;
        };

        let id = match payload.remove(FIELD_ITEM_ID) {
            Some(Value::String(id)) if !id.trim().is_empty() => id,
            _ => return None,
        };

        Some(Self { id, payload })
    }

    /// Looks up a top level payload field
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }
}

/// Full favorite state of one user, keyed by item id
pub type FavoriteSet = HashMap<String, Arc<ItemRecord>>;

/// Collects records into a [`FavoriteSet`]. Later duplicates win.
pub fn favorite_set(items: impl IntoIterator<Item = ItemRecord>) -> FavoriteSet {
    items
        .into_iter()
        .map(|item| (item.id.clone(), Arc::new(item)))
        .collect()
}
