// kegr-core/src/build/mod.rs
// Building blocks recipe steps are made of.

pub mod devtools;
pub mod env;
pub mod extract;
pub mod inreplace;
pub mod link;
pub mod process;

pub use devtools::HostInfo;
pub use env::{BuildEnvironment, MakeJobs};
pub use inreplace::{inreplace, inreplace_files, Substitution};
pub use link::{install_symlink, install_symlink_glob, link_opt, symlink_replacing};
pub use process::{CommandOutput, CommandRunner, Invocation, SharedRunner, SystemRunner};
