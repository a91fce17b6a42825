//! Debate sessions and their participants.
//!
//! A [`Session`] is owned by the caller's account; the engine only borrows
//! it for the duration of a run. The topic is immutable once the debate
//! starts, and validation happens before any phase executes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum accepted topic length after sanitation.
pub const MAX_TOPIC_LEN: usize = 2000;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created but the debate has not started.
    Draft,
    /// A debate run is in progress.
    Running,
    /// The debate reached a terminal ruling.
    Completed,
    /// The run was aborted; caller marked the session failed.
    Failed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One LLM-backed debating agent with a fixed role and model assignment.
///
/// Immutable during a run. Model assignment may be pre-computed externally
/// (balanced distribution across providers) before the engine starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Knight {
    /// Stable identifier, unique within the session.
    pub id: String,
    /// Role label (e.g. "champion", "skeptic").
    pub role: String,
    /// Goal or mandate the knight argues for.
    pub mandate: String,
    /// Optional free-text instruction appended to every prompt.
    pub instruction: Option<String>,
    /// Assigned model identifier.
    pub model: String,
    /// Assigned sampling temperature.
    pub temperature: f32,
}

impl Knight {
    pub fn new(id: &str, role: &str, mandate: &str, model: &str) -> Self {
        Self {
            id: id.to_string(),
            role: role.to_string(),
            mandate: mandate.to_string(),
            instruction: None,
            model: model.to_string(),
            temperature: 0.7,
        }
    }

    pub fn with_instruction(mut self, instruction: &str) -> Self {
        self.instruction = Some(instruction.to_string());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// A debate session: topic, panel, and bookkeeping identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Internal identifier.
    pub id: String,
    /// External identifier exposed to the caller's clients.
    pub external_id: String,
    /// Account that owns the session; scopes credential lookups.
    pub owner_id: String,
    /// The strategic question under debate. Immutable once running.
    pub topic: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Ordered panel of knights.
    pub knights: Vec<Knight>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Create a draft session with a fresh internal id.
    pub fn new(external_id: &str, owner_id: &str, topic: &str, knights: Vec<Knight>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            external_id: external_id.to_string(),
            owner_id: owner_id.to_string(),
            topic: topic.to_string(),
            status: SessionStatus::Draft,
            knights,
            created_at: Utc::now(),
        }
    }

    pub fn knight_count(&self) -> usize {
        self.knights.len()
    }
}

/// Validation errors raised before any phase runs. Fatal, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("topic is empty after sanitation")]
    EmptyTopic,

    #[error("topic exceeds {MAX_TOPIC_LEN} characters (got {0})")]
    TopicTooLong(usize),

    #[error("session has no participants")]
    NoKnights,
}

/// Sanitize a debate topic: strip control characters, collapse whitespace,
/// and reject empty or oversized input.
pub fn sanitize_topic(raw: &str) -> Result<String, SessionError> {
    // Whitespace controls (tab, CR, LF) survive this filter so that
    // split_whitespace still sees the word boundaries they mark.
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.is_empty() {
        return Err(SessionError::EmptyTopic);
    }
    if collapsed.len() > MAX_TOPIC_LEN {
        return Err(SessionError::TopicTooLong(collapsed.len()));
    }
    Ok(collapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_trims_and_collapses() {
        let topic = sanitize_topic("  Should we   enter\tmarket X?  ").unwrap();
        assert_eq!(topic, "Should we enter market X?");
        // Tabs and CRLF are word boundaries, not characters to delete.
        let topic = sanitize_topic("enter\r\nmarket\tX").unwrap();
        assert_eq!(topic, "enter market X");
    }

    #[test]
    fn test_sanitize_strips_control_chars() {
        let topic = sanitize_topic("Enter\u{0} market\u{7} X?").unwrap();
        assert_eq!(topic, "Enter market X?");
    }

    #[test]
    fn test_sanitize_rejects_empty() {
        assert_eq!(sanitize_topic("   \t\n "), Err(SessionError::EmptyTopic));
    }

    #[test]
    fn test_sanitize_rejects_oversized() {
        let raw = "x".repeat(MAX_TOPIC_LEN + 1);
        assert!(matches!(
            sanitize_topic(&raw),
            Err(SessionError::TopicTooLong(_))
        ));
    }

    #[test]
    fn test_session_new() {
        let session = Session::new(
            "ext-1",
            "acct-1",
            "Should we enter market X?",
            vec![Knight::new("k1", "champion", "argue for entry", "gpt-4o")],
        );
        assert_eq!(session.status, SessionStatus::Draft);
        assert_eq!(session.knight_count(), 1);
        assert!(!session.id.is_empty());
    }

    #[test]
    fn test_knight_builders() {
        let knight = Knight::new("k1", "skeptic", "argue against", "claude-sonnet-4")
            .with_instruction("be terse")
            .with_temperature(0.2);
        assert_eq!(knight.instruction.as_deref(), Some("be terse"));
        assert!((knight.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SessionStatus::Draft.to_string(), "draft");
        assert_eq!(SessionStatus::Failed.to_string(), "failed");
    }
}
