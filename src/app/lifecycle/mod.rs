pub mod context;
pub mod pipeline;
pub mod shutdown;
pub mod startup;
