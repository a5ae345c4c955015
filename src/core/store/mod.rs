mod firestore;
mod local_store;
mod store;

pub use self::firestore::FirestoreFavoriteStore;
pub use local_store::{LocalFavoriteStore, WriteOp};
pub use store::*;
