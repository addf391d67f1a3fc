// kegr-common/src/lib.rs
pub mod config;
pub mod dependency;
pub mod error;
pub mod model;

// Re-export key types
pub use config::Config;
pub use error::{KegrError, Result};
pub use model::{Formula, Resource, Version};
