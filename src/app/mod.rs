pub mod config;
pub mod lifecycle;

pub use lifecycle::{context, shutdown, startup};
