pub mod config_load;
pub mod favorites;
pub mod identity;
pub mod observability;
pub mod search;
pub mod store;
