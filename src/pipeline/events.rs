//! Pipeline progress events
//!
//! The orchestrator reports through an injected `EventSink`, so callers can
//! drive logging or a UI without the pipeline knowing about either.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info};

use super::RunState;

/// Progress notification emitted by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    RunStarted { stages: usize },
    StageStarted { name: String, index: usize, total: usize },
    StageFinished { name: String, index: usize, elapsed: Duration },
    StageFailed { name: String, index: usize, error: String },
    RunFinished { state: RunState },
}

/// Receiver of pipeline events
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &PipelineEvent);
}

/// Renders events through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn on_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::RunStarted { stages } => info!("Pipeline run started ({} stages)", stages),
            PipelineEvent::StageStarted { name, index, total } => {
                info!("[{}/{}] {} started", index + 1, total, name)
            }
            PipelineEvent::StageFinished { name, index, elapsed } => {
                info!("[{}] {} finished in {:?}", index + 1, name, elapsed)
            }
            PipelineEvent::StageFailed { name, index, error } => {
                error!("[{}] {} failed: {}", index + 1, name, error)
            }
            PipelineEvent::RunFinished { state } => info!("Pipeline run finished: {}", state),
        }
    }
}

/// Buffers every event in memory
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl CollectingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the events received so far
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().clone()
    }

    /// Names of stages that were started, in order
    pub fn started_stages(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::StageStarted { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn on_event(&self, event: &PipelineEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        sink.on_event(&PipelineEvent::RunStarted { stages: 2 });
        sink.on_event(&PipelineEvent::StageStarted {
            name: "load".to_string(),
            index: 0,
            total: 2,
        });
        TracingEventSink.on_event(&PipelineEvent::RunFinished {
            state: RunState::Success,
        });

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.started_stages(), vec!["load".to_string()]);
    }
}
