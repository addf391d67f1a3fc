// kegr-common/src/model/mod.rs
pub mod formula;
pub mod version;

// Re-export
pub use formula::{FetchMode, Formula, Resource};
pub use version::Version;
