//! Progress events emitted while phases run.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A phase was dispatched to its participating targets.
    PhaseStarted {
        phase: String,
        targets: usize,
        synchronized: usize,
    },
    /// One target finished a phase.
    TargetCompleted {
        phase: String,
        target: String,
        success: bool,
        skipped: bool,
    },
    /// Every task of a phase has finished.
    PhaseCompleted {
        phase: String,
        succeeded: usize,
        failed: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = PipelineEvent::TargetCompleted {
            phase: "configure".into(),
            target: "n1".into(),
            success: true,
            skipped: false,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"target_completed""#));
        assert!(json.contains("configure"));
    }
}
