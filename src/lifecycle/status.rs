//! # Resource status and its transition table.
//!
//! ```text
//! NotStarted ──► Starting ──► Running ──► Stopped
//!                   │  ▲          │
//!                   │  │          ├──────► Failed ──┐
//!                   │  └──────────┼─────────────────┘ (restart)
//!                   │             └──────► Crashed   (terminal)
//!                   └──► Stopped | Failed | Crashed
//! ```
//!
//! `Failed → Starting` is the only way back; `Crashed` is terminal.

use std::fmt;

use serde::Serialize;

/// Authoritative lifecycle status of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Registered, never started.
    #[default]
    NotStarted,
    /// Start hook in progress (or waiting on dependencies).
    Starting,
    /// Start hook finished; the resource is serving.
    Running,
    /// Clean shutdown.
    Stopped,
    /// Recoverable failure; eligible for restart.
    Failed,
    /// Unrecoverable failure; escalates to process shutdown.
    Crashed,
}

impl ResourceStatus {
    /// Returns true if `self → next` is a legal transition.
    pub fn can_transition_to(self, next: ResourceStatus) -> bool {
        use ResourceStatus::*;
        matches!(
            (self, next),
            (NotStarted, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Starting, Failed)
                | (Starting, Crashed)
                | (Running, Stopped)
                | (Running, Failed)
                | (Running, Crashed)
                | (Failed, Starting)
        )
    }

    /// True for statuses that end a run cycle.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ResourceStatus::Stopped | ResourceStatus::Failed | ResourceStatus::Crashed
        )
    }

    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceStatus::NotStarted => "not_started",
            ResourceStatus::Starting => "starting",
            ResourceStatus::Running => "running",
            ResourceStatus::Stopped => "stopped",
            ResourceStatus::Failed => "failed",
            ResourceStatus::Crashed => "crashed",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ResourceStatus::{self, *};

    const ALL: [ResourceStatus; 6] = [NotStarted, Starting, Running, Stopped, Failed, Crashed];

    #[test]
    fn restart_and_clean_stop_are_allowed() {
        assert!(Failed.can_transition_to(Starting));
        assert!(Running.can_transition_to(Stopped));
        assert!(Starting.can_transition_to(Running));
    }

    #[test]
    fn backward_and_skipping_transitions_are_rejected() {
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Starting));
        assert!(!NotStarted.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Running.can_transition_to(Starting));
    }

    #[test]
    fn crashed_is_terminal_and_self_loops_are_illegal() {
        for next in ALL {
            assert!(!Crashed.can_transition_to(next), "crashed -> {next}");
        }
        for s in ALL {
            assert!(!s.can_transition_to(s), "{s} -> {s}");
        }
    }
}
