pub mod item;
pub mod volume;
