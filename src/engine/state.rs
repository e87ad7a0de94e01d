use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a shard run or of a whole distributed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Waiting,
    Running,
    Finished,
}

impl RunState {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: &RunState) -> bool {
        use RunState::*;

        matches!(
            (self, target),
            (Waiting, Running) |
            (Running, Finished) |
            // failed before any work started
            (Waiting, Finished)
        )
    }

    /// Get human-readable state name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Finished => "finished",
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::Waiting
    }
}

/// Point-in-time view of a run.
///
/// A finished run with `err` set failed; there is no separate error state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub state: RunState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub err: Option<String>,
}

impl RunStatus {
    pub fn start(&mut self) -> bool {
        if !self.state.can_transition_to(&RunState::Running) {
            return false;
        }
        self.state = RunState::Running;
        self.started_at = Some(Utc::now());
        true
    }

    pub fn finish(&mut self, err: Option<String>) {
        if self.state == RunState::Finished {
            return;
        }
        self.state = RunState::Finished;
        self.finished_at = Some(Utc::now());
        self.err = err;
    }

    pub fn is_done(&self) -> bool {
        self.state == RunState::Finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(RunState::Waiting.can_transition_to(&RunState::Running));
        assert!(RunState::Running.can_transition_to(&RunState::Finished));
        assert!(!RunState::Finished.can_transition_to(&RunState::Running));
        assert!(!RunState::Running.can_transition_to(&RunState::Waiting));
    }

    #[test]
    fn test_serialized_lowercase() {
        let json = serde_json::to_string(&RunState::Finished).unwrap();
        assert_eq!(json, "\"finished\"");
    }

    #[test]
    fn test_status_lifecycle() {
        let mut status = RunStatus::default();
        assert!(status.start());
        assert!(!status.start());
        status.finish(Some("boom".into()));
        assert!(status.is_done());
        assert_eq!(status.err.as_deref(), Some("boom"));

        // the first outcome sticks
        status.finish(None);
        assert_eq!(status.err.as_deref(), Some("boom"));
    }
}
