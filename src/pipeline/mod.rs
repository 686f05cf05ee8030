//! Stage pipeline
//!
//! Runs an ordered list of stages over a shared `RunContext`:
//!
//! ```text
//! PENDING -> RUNNING -> SUCCESS
//!                    -> FAILED     (a stage returned an error or panicked)
//!                    -> CANCELLED  (cancel token set between stages)
//! ```
//!
//! Stage N+1 starts only after stage N completes. On failure the remaining
//! stages are skipped; on every exit path the context's temporary resources
//! are released before `run` returns.

pub mod context;
pub mod events;
pub mod stage;
pub mod stages;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::{MaskError, Result};

pub use context::RunContext;
pub use events::{CollectingEventSink, EventSink, PipelineEvent, TracingEventSink};
pub use stage::Stage;
pub use stages::{ExportStage, RewriteStage, RewriteStats, RuleLoadStage, EXPORT_ARTIFACT};

/// Lifecycle state of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Success | RunState::Failed | RunState::Cancelled)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => write!(f, "PENDING"),
            RunState::Running => write!(f, "RUNNING"),
            RunState::Success => write!(f, "SUCCESS"),
            RunState::Failed => write!(f, "FAILED"),
            RunState::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Cooperative, between-stages cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Timing of one completed stage
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub name: String,
    pub index: usize,
    pub elapsed: Duration,
}

/// Summary of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub stages: Vec<StageReport>,
}

/// Sequential stage orchestrator
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    sink: Arc<dyn EventSink>,
    cancel: CancelToken,
    state: RunState,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            sink: Arc::new(TracingEventSink),
            cancel: CancelToken::new(),
            state: RunState::Pending,
        }
    }

    /// Standard classification -> rewrite -> export sequence
    pub fn masking() -> Self {
        Self::new()
            .with_stage(RuleLoadStage::new())
            .with_stage(RewriteStage::new())
            .with_stage(ExportStage::new())
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_stage<S: Stage + 'static>(mut self, stage: S) -> Self {
        self.register(Box::new(stage));
        self
    }

    pub fn register(&mut self, stage: Box<dyn Stage>) {
        debug!("Registered stage {} at position {}", stage.name(), self.stages.len());
        self.stages.push(stage);
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Token that stops the run before its next stage
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run all stages in order against `ctx`
    pub fn run(&mut self, ctx: &mut RunContext) -> Result<RunReport> {
        self.state = RunState::Running;
        let started_at = Utc::now();
        let run_start = Instant::now();
        let total = self.stages.len();

        self.sink.on_event(&PipelineEvent::RunStarted { stages: total });
        let outcome = self.run_stages(ctx);
        ctx.release_resources();

        self.state = match &outcome {
            Ok(_) => RunState::Success,
            Err(MaskError::Cancelled { .. }) => RunState::Cancelled,
            Err(_) => RunState::Failed,
        };
        self.sink.on_event(&PipelineEvent::RunFinished { state: self.state });

        outcome.map(|stages| RunReport {
            state: RunState::Success,
            started_at,
            elapsed: run_start.elapsed(),
            stages,
        })
    }

    fn run_stages(&mut self, ctx: &mut RunContext) -> Result<Vec<StageReport>> {
        let total = self.stages.len();
        let mut reports = Vec::with_capacity(total);

        for (index, stage) in self.stages.iter_mut().enumerate() {
            let name = stage.name().to_string();

            if self.cancel.is_cancelled() {
                return Err(MaskError::Cancelled {
                    next_stage: name,
                    index,
                });
            }

            self.sink.on_event(&PipelineEvent::StageStarted {
                name: name.clone(),
                index,
                total,
            });
            let stage_start = Instant::now();

            match run_one(stage.as_mut(), ctx) {
                Ok(()) => {
                    let elapsed = stage_start.elapsed();
                    self.sink.on_event(&PipelineEvent::StageFinished {
                        name: name.clone(),
                        index,
                        elapsed,
                    });
                    reports.push(StageReport {
                        name,
                        index,
                        elapsed,
                    });
                }
                Err(source) => {
                    self.sink.on_event(&PipelineEvent::StageFailed {
                        name: name.clone(),
                        index,
                        error: format!("{:#}", source),
                    });
                    return Err(MaskError::Stage {
                        name,
                        index,
                        source,
                    });
                }
            }
        }

        Ok(reports)
    }
}

/// initialize -> validate -> execute, with cleanup on every path
fn run_one(stage: &mut dyn Stage, ctx: &mut RunContext) -> anyhow::Result<()> {
    let result = catch_unwind(AssertUnwindSafe(|| -> anyhow::Result<()> {
        stage.initialize(ctx)?;
        stage.validate_inputs(ctx)?;
        stage.execute(ctx)
    }))
    .unwrap_or_else(|panic| Err(anyhow::anyhow!("stage panicked: {}", panic_message(&*panic))));

    stage.cleanup(ctx);
    result
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    use crate::config::Config;

    /// Records calls and optionally fails, allocating a temp file on execute
    struct RecordingStage {
        name: &'static str,
        fail: bool,
        calls: Arc<AtomicUsize>,
        cleaned: Arc<AtomicUsize>,
        temp: Arc<parking_lot::Mutex<Vec<PathBuf>>>,
    }

    impl RecordingStage {
        fn new(name: &'static str, fail: bool) -> Self {
            Self {
                name,
                fail,
                calls: Arc::new(AtomicUsize::new(0)),
                cleaned: Arc::new(AtomicUsize::new(0)),
                temp: Arc::new(parking_lot::Mutex::new(Vec::new())),
            }
        }
    }

    impl Stage for RecordingStage {
        fn name(&self) -> &str {
            self.name
        }

        fn execute(&mut self, ctx: &mut RunContext) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let path = ctx.temp_file(self.name)?;
            self.temp.lock().push(path);
            ctx.artifacts.insert(self.name.to_string(), PathBuf::from(self.name));
            if self.fail {
                anyhow::bail!("{} was told to fail", self.name);
            }
            Ok(())
        }

        fn cleanup(&mut self, _ctx: &mut RunContext) {
            self.cleaned.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanicStage;

    impl Stage for PanicStage {
        fn name(&self) -> &str {
            "panics"
        }

        fn execute(&mut self, _ctx: &mut RunContext) -> anyhow::Result<()> {
            panic!("boom");
        }
    }

    fn context(root: &std::path::Path) -> RunContext {
        let mut config = Config::default();
        config.pipeline.scratch_root = Some(root.to_path_buf());
        RunContext::new(config)
    }

    #[test]
    fn test_successful_run() {
        let root = tempfile::tempdir().unwrap();
        let mut ctx = context(root.path());
        let sink = Arc::new(CollectingEventSink::new());
        let mut pipeline = Pipeline::new()
            .with_event_sink(sink.clone())
            .with_stage(RecordingStage::new("one", false))
            .with_stage(RecordingStage::new("two", false));

        assert_eq!(pipeline.state(), RunState::Pending);
        let report = pipeline.run(&mut ctx).unwrap();

        assert_eq!(pipeline.state(), RunState::Success);
        assert_eq!(report.stages.len(), 2);
        assert_eq!(sink.started_stages(), vec!["one", "two"]);
        assert!(ctx.live_temp_paths().is_empty());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_failure_stops_run_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let mut ctx = context(root.path());
        let first = RecordingStage::new("first", false);
        let second = RecordingStage::new("second", true);
        let third = RecordingStage::new("third", false);
        let (second_cleaned, third_calls) = (second.cleaned.clone(), third.calls.clone());
        let temps = [first.temp.clone(), second.temp.clone()];

        let sink = Arc::new(CollectingEventSink::new());
        let mut pipeline = Pipeline::new()
            .with_event_sink(sink.clone())
            .with_stage(first)
            .with_stage(second)
            .with_stage(third);

        let err = pipeline.run(&mut ctx).unwrap_err();
        assert_eq!(err.failed_stage(), Some(("second", 1)));
        assert!(err.to_string().contains("told to fail"));
        assert_eq!(pipeline.state(), RunState::Failed);

        // First stage's effects remain, third never ran
        assert!(ctx.artifacts.contains_key("first"));
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
        assert_eq!(second_cleaned.load(Ordering::SeqCst), 1);
        assert_eq!(sink.started_stages(), vec!["first", "second"]);

        for temp in temps.iter() {
            for path in temp.lock().iter() {
                assert!(!path.exists());
            }
        }
        assert!(ctx.live_temp_paths().is_empty());
    }

    #[test]
    fn test_panic_becomes_stage_error() {
        let mut ctx = RunContext::default();
        let mut pipeline = Pipeline::new()
            .with_stage(RecordingStage::new("ok", false))
            .with_stage(PanicStage);

        let err = pipeline.run(&mut ctx).unwrap_err();
        assert_eq!(err.failed_stage(), Some(("panics", 1)));
        assert!(err.to_string().contains("boom"));
        assert!(ctx.live_temp_paths().is_empty());
    }

    #[test]
    fn test_cancel_between_stages() {
        let mut ctx = RunContext::default();
        let stage = RecordingStage::new("never", false);
        let calls = stage.calls.clone();
        let mut pipeline = Pipeline::new().with_stage(stage);

        pipeline.cancel_token().cancel();
        let err = pipeline.run(&mut ctx).unwrap_err();
        assert!(matches!(err, MaskError::Cancelled { index: 0, .. }));
        assert_eq!(pipeline.state(), RunState::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_run_state_display() {
        assert_eq!(RunState::Cancelled.to_string(), "CANCELLED");
        assert!(RunState::Failed.is_terminal());
        assert!(!RunState::Running.is_terminal());
    }
}
