pub mod favorites;
pub mod identity;
pub mod models;
pub mod observability;
pub mod search;
pub mod store;
pub mod tls;
