//! Utility modules

pub mod memory_runs;
pub mod memory_sources;
pub mod memory_storage;
pub mod validation;

pub use memory_runs::*;
pub use memory_sources::*;
pub use memory_storage::*;
pub use validation::*;
