//! Bounded fixed-point pass scheduler.

use crate::{
    deobfuscation::pass::{AstPass, PassContext},
    source::SyntaxTree,
    Result,
};

/// Runs passes in order until none of them changes the tree.
///
/// Each pass runs with exclusive access to the tree. Its report is committed
/// to the run's log as soon as it returns. Input-driven errors become failed
/// records; anything else propagates.
#[derive(Debug, Clone)]
pub struct PassScheduler {
    max_iterations: usize,
}

impl PassScheduler {
    /// Creates a scheduler with an iteration cap (at least one).
    #[must_use]
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
        }
    }

    /// The iteration cap.
    #[must_use]
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Runs `passes` until a full sweep changes nothing or the cap is reached.
    ///
    /// # Returns
    ///
    /// The number of sweeps performed.
    ///
    /// # Errors
    ///
    /// Returns the first internal (non input-driven) error raised by a pass.
    pub fn run_to_fixpoint(
        &self,
        passes: &[Box<dyn AstPass>],
        tree: &mut SyntaxTree,
        ctx: &PassContext,
    ) -> Result<usize> {
        let mut iterations = 0;
        while iterations < self.max_iterations {
            iterations += 1;
            if !self.run_once(passes, tree, ctx)? {
                break;
            }
        }
        Ok(iterations)
    }

    /// Runs every pass once.
    ///
    /// # Returns
    ///
    /// `true` if any pass changed the tree.
    ///
    /// # Errors
    ///
    /// Returns the first internal (non input-driven) error raised by a pass.
    pub fn run_once(
        &self,
        passes: &[Box<dyn AstPass>],
        tree: &mut SyntaxTree,
        ctx: &PassContext,
    ) -> Result<bool> {
        let mut changed = false;
        for pass in passes {
            if !pass.should_run(ctx) {
                continue;
            }
            changed |= run_pass(pass.as_ref(), tree, ctx)?;
        }
        Ok(changed)
    }
}

impl Default for PassScheduler {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Runs a single pass and commits its outcome.
///
/// # Returns
///
/// `true` if the pass changed the tree.
///
/// # Errors
///
/// Returns the pass error if it is not input-driven.
pub fn run_pass(pass: &dyn AstPass, tree: &mut SyntaxTree, ctx: &PassContext) -> Result<bool> {
    match pass.run(tree, ctx) {
        Ok(report) => {
            let changed = report.is_changed();
            if changed {
                log::debug!("pass {} changed the tree", pass.name());
            }
            ctx.commit(report);
            Ok(changed)
        }
        Err(err) if err.is_input_driven() => {
            ctx.record_failure(pass.kind(), format!("{}: {err}", pass.name()));
            Ok(false)
        }
        Err(err) => Err(err),
    }
}
