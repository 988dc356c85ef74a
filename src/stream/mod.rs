//! Live event stream over a run.
//!
//! [`StreamAdapter::events`] spawns the orchestrator on a producer task and
//! bridges its committed steps through a bounded channel. The consumer sees
//! `start`, one `step` per committed stage, then exactly one of `done` or
//! `error`. Dropping the stream closes the channel, which the orchestrator
//! treats as cancellation on its next send.

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::llm::ModelTier;
use crate::pipeline::{Orchestrator, PipelineStep, RunOutcome, RunReport};
use crate::prompts::clip;

/// Characters of a step response shown in `response_preview`.
pub const PREVIEW_CHARS: usize = 500;

/// Payload of a `step` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepEvent {
    pub stage_index: u8,
    pub stage_name: String,
    pub tier: ModelTier,
    pub model: String,
    pub attempt: Option<u32>,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub response_preview: String,
    pub response_full: String,
}

impl From<&PipelineStep> for StepEvent {
    fn from(step: &PipelineStep) -> Self {
        Self {
            stage_index: step.stage_index,
            stage_name: step.stage_name.clone(),
            tier: step.tier,
            model: step.model.clone(),
            attempt: step.attempt,
            success: step.success,
            timestamp: step.timestamp,
            response_preview: clip(&step.output, PREVIEW_CHARS).to_string(),
            response_full: step.output.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    Start {
        topic: String,
        timestamp: DateTime<Utc>,
    },
    Step(StepEvent),
    Done {
        run_id: String,
        timestamp: DateTime<Utc>,
        total_duration_seconds: f64,
        #[serde(flatten)]
        outcome: RunOutcome,
    },
    Error {
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl StreamEvent {
    pub fn done(report: &RunReport) -> Self {
        StreamEvent::Done {
            run_id: report.run_id.clone(),
            timestamp: report.finished_at,
            total_duration_seconds: report.duration_ms() as f64 / 1000.0,
            outcome: report.outcome.clone(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            error: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// SSE event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::Start { .. } => "start",
            StreamEvent::Step(_) => "step",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }

    /// `event: {name}\ndata: {json}\n\n`
    pub fn to_sse_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!(
            "event: {}\ndata: {}\n\n",
            self.event_name(),
            serde_json::to_string(self)?
        ))
    }
}

/// Turns one run into a stream of [`StreamEvent`]s.
#[derive(Clone)]
pub struct StreamAdapter {
    orchestrator: Arc<Orchestrator>,
}

impl StreamAdapter {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Start a run for `topic` and stream its events.
    ///
    /// The run begins when the stream is first polled.
    pub fn events(&self, topic: String) -> impl Stream<Item = StreamEvent> + Send + 'static {
        let orchestrator = self.orchestrator.clone();
        let capacity = orchestrator.config().event_buffer.max(1);

        async_stream::stream! {
            yield StreamEvent::Start { topic: topic.clone(), timestamp: Utc::now() };

            let (tx, mut rx) = mpsc::channel::<PipelineStep>(capacity);
            let producer = tokio::spawn(async move { orchestrator.run(&topic, Some(tx)).await });

            while let Some(step) = rx.recv().await {
                yield StreamEvent::Step(StepEvent::from(&step));
            }

            match producer.await {
                Ok(report) => yield StreamEvent::done(&report),
                Err(e) => {
                    tracing::error!(error = %e, "Run task failed");
                    yield StreamEvent::error(format!("run task failed: {}", e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineConfig, Stage};
    use crate::stages::test_support::{Scripted, ScriptedProvider};
    use crate::storage::MemoryRunStore;
    use futures::StreamExt;
    use serde_json::json;

    #[test]
    fn test_sse_frame_shape() {
        let step = PipelineStep::new(Stage::Judge, ModelTier::Strong, "opus", Some(1), false, "é".repeat(600));
        let event = StreamEvent::Step(StepEvent::from(&step));
        let frame = event.to_sse_frame().expect("frame");

        assert!(frame.starts_with("event: step\ndata: {"));
        assert!(frame.ends_with("}\n\n"));
        let data: serde_json::Value =
            serde_json::from_str(frame.trim_start_matches("event: step\ndata: ").trim_end()).expect("json");
        assert_eq!(data["event"], "step");
        assert_eq!(data["stage_index"], 6);
        assert_eq!(data["tier"], "strong");
        assert_eq!(data["response_preview"].as_str().map(|s| s.chars().count()), Some(500));
        assert_eq!(data["response_full"].as_str().map(|s| s.chars().count()), Some(600));
    }

    #[test]
    fn test_done_flattens_outcome() {
        let event = StreamEvent::Done {
            run_id: "r".to_string(),
            timestamp: Utc::now(),
            total_duration_seconds: 1.5,
            outcome: RunOutcome {
                stopped_at_stage: 6,
                attempts: 3,
                ..RunOutcome::default()
            },
        };
        let value = serde_json::to_value(&event).expect("json");
        assert_eq!(value["event"], "done");
        assert_eq!(value["stopped_at_stage"], 6);
        assert_eq!(value["final_success"], false);
        assert!(event.is_terminal());
    }

    #[tokio::test]
    async fn test_stream_has_one_terminal_event() {
        let provider = ScriptedProvider::new(vec![
            Scripted::Tool(json!({
                "Beginner": ["Loop range bounds", "String slicing pitfalls", "Integer division rounding"],
                "Intermediate": ["Iterator invalidation hazards", "Closure capture semantics", "Error propagation chains"],
                "Advanced": ["Lock ordering deadlocks", "Memory ordering fences", "Async cancellation safety"],
            })),
            Scripted::Fail,
        ]);
        let orchestrator = Orchestrator::new(provider, Arc::new(MemoryRunStore::new()), PipelineConfig::default());
        let adapter = StreamAdapter::new(Arc::new(orchestrator));

        let events: Vec<StreamEvent> = adapter.events("Rust".to_string()).collect().await;
        let names: Vec<&str> = events.iter().map(StreamEvent::event_name).collect();
        assert_eq!(names, vec!["start", "step", "step", "done"]);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        match events.last() {
            Some(StreamEvent::Done { outcome, .. }) => {
                assert_eq!(outcome.stopped_at_stage, 2);
                assert!(!outcome.cancelled);
            }
            other => panic!("unexpected terminal event: {:?}", other),
        }
    }
}
