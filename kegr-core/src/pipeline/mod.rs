// kegr-core/src/pipeline/mod.rs
// Ordered, fail-fast step execution for recipe lifecycles.

use std::fmt;

use kegr_common::error::{KegrError, Result};
use kegr_common::model::Formula;
use tracing::{debug, error, info};

pub mod context;

pub use context::{BuildContext, CommandContext, KegContext, KegPaths, TestContext};

pub const INSTALL_PHASE: &str = "install";
pub const POST_INSTALL_PHASE: &str = "post_install";
pub const TEST_PHASE: &str = "test";

/// A named unit of work run against a phase context.
pub struct Step<C> {
    pub name: &'static str,
    pub run: fn(&mut C) -> Result<()>,
}

impl<C> Step<C> {
    pub const fn new(name: &'static str, run: fn(&mut C) -> Result<()>) -> Self {
        Self { name, run }
    }
}

impl<C> Clone for Step<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Step<C> {}

impl<C> fmt::Debug for Step<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}

/// Runs `steps` strictly in order against `ctx`.
///
/// The first failing step ends the phase; its error comes back wrapped in
/// `StepFailed` naming the phase and step. Later steps never start.
pub fn run_steps<C>(phase: &'static str, steps: &[Step<C>], ctx: &mut C) -> Result<()> {
    info!("Running {} phase ({} steps)", phase, steps.len());
    for (index, step) in steps.iter().enumerate() {
        debug!("[{}] step {}/{}: {}", phase, index + 1, steps.len(), step.name);
        if let Err(e) = (step.run)(ctx) {
            error!("[{}] step '{}' failed: {}", phase, step.name, e);
            return Err(KegrError::StepFailed {
                phase,
                step: step.name,
                source: Box::new(e),
            });
        }
    }
    debug!("{} phase complete", phase);
    Ok(())
}

/// A formula plus its three lifecycle step lists.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub formula: Formula,
    pub install: Vec<Step<BuildContext>>,
    pub post_install: Vec<Step<KegContext>>,
    pub test: Vec<Step<TestContext>>,
}

impl Recipe {
    pub fn name(&self) -> &str {
        self.formula.name()
    }
}
