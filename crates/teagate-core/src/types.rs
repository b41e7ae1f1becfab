//! ============================================================================
//! Core Types for Tea Gate
//! ============================================================================
//! Action kinds shared by the rate limiter, content checks and the gate.
//! Serialized as snake_case strings for RPC bodies and CLI output.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// A kind of user action subject to gating
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Spilling a new anonymous post
    Submission,
    Comment,
    LoginAttempt,
    /// Casting a governance vote
    Vote,
    Reaction,
    Tip,
    /// Redeeming a beta access code
    BetaCode,
    /// Any other caller-defined action
    Custom(String),
}

impl ActionKind {
    /// Stable name used in bucket keys and RPC bodies
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::Submission => "submission",
            ActionKind::Comment => "comment",
            ActionKind::LoginAttempt => "login_attempt",
            ActionKind::Vote => "vote",
            ActionKind::Reaction => "reaction",
            ActionKind::Tip => "tip",
            ActionKind::BetaCode => "beta_code",
            ActionKind::Custom(name) => name.as_str(),
        }
    }

    /// Parse a user-supplied action name; unknown names become `Custom`
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().replace('-', "_").as_str() {
            "submission" | "submit" | "post" => ActionKind::Submission,
            "comment" => ActionKind::Comment,
            "login_attempt" | "login" => ActionKind::LoginAttempt,
            "vote" => ActionKind::Vote,
            "reaction" | "react" => ActionKind::Reaction,
            "tip" => ActionKind::Tip,
            "beta_code" => ActionKind::BetaCode,
            other => ActionKind::Custom(other.to_string()),
        }
    }

    /// Maximum free-text payload length accepted for this action
    pub fn max_content_length(&self) -> usize {
        match self {
            ActionKind::Submission => 1000,
            ActionKind::Comment => 500,
            _ => 280,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
