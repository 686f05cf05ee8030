//! Stage contract

use super::context::RunContext;

/// One unit of the sequential pipeline
///
/// The orchestrator calls, in order: `initialize`, `validate_inputs`,
/// `execute`, then `cleanup` (always, even when an earlier step failed).
/// Stages that are never reached are never initialized.
pub trait Stage: Send {
    /// Stage name used in events, reports and errors
    fn name(&self) -> &str;

    /// Prepare per-run state
    fn initialize(&mut self, _ctx: &mut RunContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Check that the inputs this stage needs are present in the context
    fn validate_inputs(&self, _ctx: &RunContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Do the stage's work
    fn execute(&mut self, ctx: &mut RunContext) -> anyhow::Result<()>;

    /// Release stage-local resources
    fn cleanup(&mut self, _ctx: &mut RunContext) {}
}
