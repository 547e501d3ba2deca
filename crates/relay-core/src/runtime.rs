//! Process runtime snapshot for a session.
//!
//! The runtime is a `{phase, process_state, activity, last_exit}` tuple
//! plus the time it last changed. The core does not validate combinations;
//! whoever marks the runtime is responsible for supplying a sensible one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse lifecycle phase of the session's agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimePhase {
    /// No process, nothing wrong.
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
    /// Process ended unexpectedly.
    Error,
}

impl RuntimePhase {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for RuntimePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// State of the OS process itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// What the agent is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Activity {
    #[default]
    Idle,
    Thinking,
    RunningTool,
    AwaitingInput,
}

/// How the last process run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessExit {
    /// Exit code; `None` when killed by a signal or unknown.
    pub code: Option<i32>,
    pub timestamp: DateTime<Utc>,
    pub unexpected: bool,
}

impl ProcessExit {
    /// Records an exit observed now. Unexpected unless the code is 0.
    pub fn now(code: Option<i32>) -> Self {
        Self {
            code,
            timestamp: Utc::now(),
            unexpected: Self::is_unexpected(code),
        }
    }

    /// A missing or nonzero exit code counts as unexpected.
    #[must_use]
    pub fn is_unexpected(code: Option<i32>) -> bool {
        code != Some(0)
    }
}

/// Current lifecycle snapshot of a session's process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRuntime {
    pub phase: RuntimePhase,
    pub process_state: ProcessState,
    pub activity: Activity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_exit: Option<ProcessExit>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRuntime {
    /// A fresh runtime: idle, stopped, no exit recorded.
    pub fn new() -> Self {
        Self {
            phase: RuntimePhase::default(),
            process_state: ProcessState::default(),
            activity: Activity::default(),
            last_exit: None,
            updated_at: Utc::now(),
        }
    }
}

impl Default for SessionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Fields to apply to a [`SessionRuntime`]. `None` means "not supplied".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<RuntimePhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_state: Option<ProcessState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<Activity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_exit: Option<ProcessExit>,
}

impl RuntimeUpdate {
    pub fn phase(mut self, phase: RuntimePhase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn process_state(mut self, state: ProcessState) -> Self {
        self.process_state = Some(state);
        self
    }

    pub fn activity(mut self, activity: Activity) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn last_exit(mut self, exit: ProcessExit) -> Self {
        self.last_exit = Some(exit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_classification() {
        assert!(ProcessExit::is_unexpected(None));
        assert!(ProcessExit::is_unexpected(Some(1)));
        assert!(ProcessExit::is_unexpected(Some(-9)));
        assert!(!ProcessExit::is_unexpected(Some(0)));
    }

    #[test]
    fn test_new_runtime_defaults() {
        let runtime = SessionRuntime::new();
        assert_eq!(runtime.phase, RuntimePhase::Idle);
        assert_eq!(runtime.process_state, ProcessState::Stopped);
        assert_eq!(runtime.activity, Activity::Idle);
        assert!(runtime.last_exit.is_none());
    }

    #[test]
    fn test_update_builder() {
        let update = RuntimeUpdate::default()
            .phase(RuntimePhase::Running)
            .process_state(ProcessState::Running);
        assert_eq!(update.phase, Some(RuntimePhase::Running));
        assert_eq!(update.activity, None);
    }

    #[test]
    fn test_activity_wire_format() {
        assert_eq!(serde_json::to_string(&Activity::Idle).unwrap(), "\"IDLE\"");
        assert_eq!(
            serde_json::to_string(&Activity::RunningTool).unwrap(),
            "\"RUNNING_TOOL\""
        );
    }
}
