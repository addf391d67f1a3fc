// kegr-core/src/lib.rs

pub mod build;
pub mod formulae;
pub mod install;
pub mod pipeline;
pub mod search;

// Re-export key types for the CLI crate
pub use build::devtools::HostInfo;
pub use build::process::{SharedRunner, SystemRunner};
pub use install::{install_formula, run_post_install, run_tests, InstallOptions};
pub use pipeline::Recipe;
pub use search::{SearchPage, SiteSearch};
