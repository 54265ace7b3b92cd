use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of one action inside a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// The action as declared (for the shell executor, the command line)
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn success(action: &str, exit_code: Option<i32>, output: &str) -> Self {
        Self {
            action: action.to_string(),
            exit_code,
            output: output.to_string(),
            error: None,
        }
    }

    pub fn failure(action: &str, exit_code: Option<i32>, error: &str) -> Self {
        Self {
            action: action.to_string(),
            exit_code,
            output: String::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Result of running one phase on one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    /// Target id
    pub target: String,
    pub group: String,
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<serde_json::Value>,
    #[serde(default)]
    pub action_results: Vec<ActionResult>,
    /// Phase-level error not attributable to a single action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when a guard declined the work but the target still took part
    #[serde(default)]
    pub skipped: bool,
    #[serde(with = "duration_serde", default)]
    pub duration: Duration,
}

impl PhaseResult {
    pub fn new(target: &str, group: &str, phase: &str) -> Self {
        Self {
            target: target.to_string(),
            group: group.to_string(),
            phase: phase.to_string(),
            return_value: None,
            action_results: Vec::new(),
            error: None,
            skipped: false,
            duration: Duration::ZERO,
        }
    }

    pub fn skipped(target: &str, group: &str, phase: &str) -> Self {
        Self {
            skipped: true,
            ..Self::new(target, group, phase)
        }
    }

    pub fn with_actions(mut self, actions: Vec<ActionResult>) -> Self {
        self.action_results = actions;
        self
    }

    pub fn with_return_value(mut self, value: serde_json::Value) -> Self {
        self.return_value = Some(value);
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// The first failed action, if any.
    pub fn action_error(&self) -> Option<&ActionResult> {
        self.action_results.iter().find(|a| a.is_error())
    }

    /// True if the phase itself or any of its actions failed.
    pub fn has_error(&self) -> bool {
        self.error.is_some() || self.action_error().is_some()
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_result_has_no_error() {
        let result = PhaseResult::new("n1", "web", "configure")
            .with_actions(vec![ActionResult::success("echo hi", Some(0), "hi\n")]);
        assert!(!result.has_error());
        assert!(result.action_error().is_none());
    }

    #[test]
    fn test_action_error_is_detected() {
        let result = PhaseResult::new("n1", "web", "configure").with_actions(vec![
            ActionResult::success("true", Some(0), ""),
            ActionResult::failure("false", Some(1), "exit status 1"),
        ]);
        assert!(result.has_error());
        assert_eq!(result.action_error().map(|a| a.action.as_str()), Some("false"));
    }

    #[test]
    fn test_phase_error_is_detected() {
        let result = PhaseResult::new("n1", "web", "configure").with_error("aborted");
        assert!(result.has_error());
        assert!(result.action_error().is_none());
    }

    #[test]
    fn test_duration_serializes_as_millis() {
        let result =
            PhaseResult::new("n1", "web", "configure").with_duration(Duration::from_millis(1500));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["duration"], 1500);

        let parsed: PhaseResult = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.duration, Duration::from_millis(1500));
    }
}
