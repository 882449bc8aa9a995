//! Execution lifecycle status and its state machine.
//!
//! Every execution moves `pending → running → {success | failed | timeout |
//! cancelled}`. The four terminal states are absorbing: once an execution
//! reaches one of them, no further status writes are allowed (a racing
//! finalizer may still backfill missing diagnostic fields, but never the
//! status itself).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a script execution.
///
/// The string forms match the `executions.status` column exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
    Cancelled,
}

impl ExecutionStatus {
    /// Database/wire representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the database representation back into a status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "timeout" => Some(Self::Timeout),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// True for the four absorbing terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }

    /// Valid target statuses reachable from `self`.
    ///
    /// Terminal states return an empty slice.
    pub fn valid_transitions(&self) -> &'static [ExecutionStatus] {
        match self {
            Self::Pending => &[Self::Running],
            Self::Running => &[Self::Success, Self::Failed, Self::Timeout, Self::Cancelled],
            _ => &[],
        }
    }

    /// Check whether a transition from `self` to `to` is valid.
    pub fn can_transition(&self, to: ExecutionStatus) -> bool {
        self.valid_transitions().contains(&to)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::ExecutionStatus::*;

    #[test]
    fn string_round_trip() {
        for status in [Pending, Running, Success, Failed, Timeout, Cancelled] {
            assert_eq!(super::ExecutionStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn parse_unknown_is_none() {
        assert_eq!(super::ExecutionStatus::parse("crashed"), None);
    }

    #[test]
    fn running_reaches_all_terminal_states() {
        for to in [Success, Failed, Timeout, Cancelled] {
            assert!(Running.can_transition(to));
        }
    }

    #[test]
    fn pending_only_reaches_running() {
        assert!(Pending.can_transition(Running));
        assert!(!Pending.can_transition(Success));
        assert!(!Pending.can_transition(Failed));
    }

    #[test]
    fn terminal_states_are_absorbing() {
        for from in [Success, Failed, Timeout, Cancelled] {
            assert!(from.is_terminal());
            assert!(from.valid_transitions().is_empty());
        }
    }

    #[test]
    fn cancelled_cannot_become_success() {
        assert!(!Cancelled.can_transition(Success));
    }

    #[test]
    fn exactly_four_terminal_states() {
        let terminal: Vec<_> = [Pending, Running, Success, Failed, Timeout, Cancelled]
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(terminal.len(), 4);
    }
}
