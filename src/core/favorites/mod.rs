mod cache;
mod coordinator;
mod sync;

pub use cache::{FavoritesCache, FavoritesView, Intent, IntentKind};
pub use coordinator::{ToggleCoordinator, ToggleError, ToggleOutcome};
pub use sync::FavoritesSync;
