//! Task lifecycle state machine and task identity.
//!
//! ```text
//! Received ──► Translating ──► Uploading ──► Done
//!     │             │              │
//!     └─────────────┴──────────────┴───────► Error
//! ```
//!
//! `Done` and `Error` are terminal. The numeric codes are the values written
//! to the state store and shown to polling clients.

use crate::error::TaskError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse, user-visible status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Received,
    Translating,
    Uploading,
    Done,
    Error,
}

impl TaskStatus {
    /// Stored status code.
    pub fn code(self) -> u8 {
        match self {
            TaskStatus::Received => 0,
            TaskStatus::Translating => 1,
            TaskStatus::Uploading => 2,
            TaskStatus::Done => 3,
            TaskStatus::Error => 9,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TaskStatus::Received),
            1 => Some(TaskStatus::Translating),
            2 => Some(TaskStatus::Uploading),
            3 => Some(TaskStatus::Done),
            9 => Some(TaskStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }

    /// Whether the lifecycle allows moving from `self` to `next` in one step.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Received, Translating) | (Translating, Uploading) | (Uploading, Done) => true,
            (from, Error) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Checked transition.
    pub fn transition(self, next: TaskStatus) -> Result<TaskStatus, TaskError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TaskError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Received => "received",
            TaskStatus::Translating => "translating",
            TaskStatus::Uploading => "uploading",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
        };
        f.write_str(s)
    }
}

// ── Task identity ────────────────────────────────────────────────────────

/// `"{username}-{token}"`, the id handed back to the submitter.
///
/// The token is a UUID v4 without hyphens, so the id splits into exactly two
/// parts as long as the username itself has no hyphen. Usernames with a
/// hyphen produce ids that [`TaskId::parse`] rejects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId {
    username: String,
    token: String,
}

impl TaskId {
    /// Fresh id for `username`.
    pub fn generate(username: &str) -> Self {
        Self {
            username: username.to_string(),
            token: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    /// Split `"{username}-{token}"` into its parts.
    pub fn parse(id: &str) -> Result<Self, TaskError> {
        let parts: Vec<&str> = id.split('-').collect();
        match parts.as_slice() {
            [user, token] if !user.is_empty() && !token.is_empty() => Ok(Self {
                username: (*user).to_string(),
                token: (*token).to_string(),
            }),
            _ => Err(TaskError::InvalidTaskId { id: id.to_string() }),
        }
    }

    /// Parse `id` and check that it belongs to `caller`.
    pub fn authorize(id: &str, caller: &str) -> Result<Self, TaskError> {
        let parsed = Self::parse(id)?;
        if parsed.username != caller {
            return Err(TaskError::NotAuthorized { id: id.to_string() });
        }
        Ok(parsed)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Store key for this task within its user's namespace.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.username, self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    const ALL: [TaskStatus; 5] = [Received, Translating, Uploading, Done, Error];

    #[test]
    fn received_only_moves_to_translating_or_error() {
        let reachable: Vec<_> = ALL
            .into_iter()
            .filter(|s| Received.can_transition_to(*s))
            .collect();
        assert_eq!(reachable, vec![Translating, Error]);
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in [Done, Error] {
            assert!(from.is_terminal());
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn happy_path_and_error_from_every_live_state() {
        assert!(Translating.can_transition_to(Uploading));
        assert!(Uploading.can_transition_to(Done));
        for from in [Received, Translating, Uploading] {
            assert!(from.can_transition_to(Error));
        }
        assert!(!Received.can_transition_to(Done));
        assert!(!Uploading.can_transition_to(Translating));
    }

    #[test]
    fn transition_reports_illegal_move() {
        let err = Done.transition(Error).unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { from: Done, to: Error }));
        assert_eq!(Received.transition(Translating).unwrap(), Translating);
    }

    #[test]
    fn status_codes() {
        assert_eq!(Error.code(), 9);
        for s in ALL {
            assert_eq!(TaskStatus::from_code(s.code()), Some(s));
        }
        assert_eq!(TaskStatus::from_code(4), None);
    }

    #[test]
    fn generated_id_parses_back() {
        let id = TaskId::generate("alice");
        assert!(!id.token().contains('-'));
        let parsed = TaskId::parse(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn malformed_ids_are_rejected() {
        for bad in ["", "alice", "alice-", "-tok", "a-b-c"] {
            assert!(
                matches!(TaskId::parse(bad), Err(TaskError::InvalidTaskId { .. })),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn hyphenated_username_cannot_round_trip() {
        let id = TaskId::generate("mary-jane");
        assert!(TaskId::parse(&id.to_string()).is_err());
    }

    #[test]
    fn authorize_checks_owner() {
        assert!(TaskId::authorize("alice-abc", "alice").is_ok());
        assert!(matches!(
            TaskId::authorize("alice-abc", "bob"),
            Err(TaskError::NotAuthorized { .. })
        ));
    }
}
