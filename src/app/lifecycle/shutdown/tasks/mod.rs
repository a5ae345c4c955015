pub mod favorites;
pub mod observability;
