use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::mock_data::MockDataSet;
use crate::core::pipeline::Step;
use crate::core::tree::ConfigTree;

/// One event on a project's progress channel. The serialized shapes are the
/// wire contract clients depend on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Status {
        step: Step,
        message: String,
    },
    State {
        step: Step,
        data: Value,
    },
    Complete {
        message: String,
        config: ConfigTree,
        #[serde(rename = "mockData")]
        mock_data: MockDataSet,
    },
    Error {
        step: Step,
        error: String,
    },
}

impl RunEvent {
    pub fn status(step: Step) -> Self {
        RunEvent::Status {
            step,
            message: step.status_message().to_string(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            RunEvent::Status { .. } => "status",
            RunEvent::State { .. } => "state",
            RunEvent::Complete { .. } => "complete",
            RunEvent::Error { .. } => "error",
        }
    }

    pub fn step(&self) -> Step {
        match self {
            RunEvent::Status { step, .. } | RunEvent::State { step, .. } => *step,
            RunEvent::Error { step, .. } => *step,
            RunEvent::Complete { .. } => Step::Complete,
        }
    }

    /// `complete` and `error` end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Complete { .. } | RunEvent::Error { .. })
    }
}

/// An event with its position in the project's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedEvent {
    pub seq: u64,
    pub event: RunEvent,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn wire_shapes() {
        let status = serde_json::to_value(RunEvent::status(Step::AnalyzeIntent)).unwrap();
        assert_eq!(
            status,
            json!({"type": "status", "step": "analyze_intent", "message": "Analyzing your request..."})
        );

        let state = RunEvent::State {
            step: Step::ApplyPatch,
            data: json!({"version": 2}),
        };
        assert_eq!(
            serde_json::to_value(state).unwrap(),
            json!({"type": "state", "step": "apply_patch", "data": {"version": 2}})
        );

        let error = RunEvent::Error {
            step: Step::ApplyPatch,
            error: "ValidationError: nope".into(),
        };
        assert_eq!(
            serde_json::to_value(error).unwrap(),
            json!({"type": "error", "step": "apply_patch", "error": "ValidationError: nope"})
        );

        let complete = serde_json::to_value(RunEvent::Complete {
            message: "done".into(),
            config: ConfigTree::default(),
            mock_data: MockDataSet::default(),
        })
        .unwrap();
        assert_eq!(complete["type"], "complete");
        assert!(complete.get("mockData").is_some());
        assert!(complete.get("config").is_some());
    }

    #[test]
    fn parses_back_from_wire() {
        let event: RunEvent =
            serde_json::from_value(json!({"type": "error", "step": "save_output", "error": "x"}))
                .unwrap();
        assert_eq!(event.step(), Step::SaveOutput);
        assert!(event.is_terminal());
        assert_eq!(event.event_type(), "error");
    }
}
