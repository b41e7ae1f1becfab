//! ============================================================================
//! Content Validator - injection checks & HTML sanitization
//! ============================================================================
//! Classifies free text before it becomes tea:
//! - Empty text is a usage error, not a security event
//! - Over-length text costs 20 points and raises risk to medium
//! - XSS vectors block outright (critical, score 0)
//! - SQL-injection keywords block (high, -50)
//!
//! A sanitized copy is always produced, but a blocked verdict's sanitized text
//! must never be used to carry out the action.
//! ============================================================================

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Threat label for over-length content
pub const THREAT_TOO_LONG: &str = "exceeds maximum length";
/// Threat label for script-injection vectors
pub const THREAT_XSS: &str = "XSS attack vector detected";
/// Threat label for SQL-injection keywords
pub const THREAT_SQL: &str = "SQL injection pattern detected";

const MAX_SCORE: i32 = 100;
const LENGTH_PENALTY: i32 = 20;
const SQL_PENALTY: i32 = 50;

/// Tags that survive sanitization (attributes are dropped)
const ALLOWED_TAGS: &[&str] = &["b", "strong", "i", "em", "u", "p", "br"];

/// A named, compiled detection pattern
struct ThreatPattern {
    name: &'static str,
    regex: Regex,
}

impl ThreatPattern {
    fn new(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("invalid threat pattern"),
        }
    }
}

/// Script-injection vectors, checked in order
static XSS_PATTERNS: Lazy<Vec<ThreatPattern>> = Lazy::new(|| {
    vec![
        ThreatPattern::new("script_tag", r"(?i)<\s*/?\s*script\b"),
        ThreatPattern::new("javascript_uri", r"(?i)javascript\s*:"),
        ThreatPattern::new("vbscript_uri", r"(?i)vbscript\s*:"),
        ThreatPattern::new("data_uri", r"(?i)\bdata\s*:\s*[a-z]+/[a-z0-9.+-]+"),
        ThreatPattern::new("event_handler", r"(?i)<[^>]*\bon[a-z]+\s*="),
        ThreatPattern::new("embedded_frame", r"(?i)<\s*(iframe|object|embed)\b"),
        ThreatPattern::new("dynamic_eval", r"(?i)\b(eval|settimeout|setinterval)\s*\("),
    ]
});

/// SQL-injection keywords and comment markers, checked in order
static SQL_PATTERNS: Lazy<Vec<ThreatPattern>> = Lazy::new(|| {
    vec![
        ThreatPattern::new("union_select", r"(?i)\bunion\s+(all\s+)?select\b"),
        ThreatPattern::new("drop_table", r"(?i)\bdrop\s+table\b"),
        ThreatPattern::new("insert_into", r"(?i)\binsert\s+into\b"),
        ThreatPattern::new("delete_from", r"(?i)\bdelete\s+from\b"),
        ThreatPattern::new("alter_table", r"(?i)\balter\s+table\b"),
        ThreatPattern::new("line_comment", r"--"),
        ThreatPattern::new("block_comment", r"/\*|\*/"),
    ]
});

/// A complete tag whose name follows `<` or `</` directly, or a stray bracket
static MARKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(/?)([A-Za-z][A-Za-z0-9]*)(?:\s[^<>]*)?/?>|[<>]").expect("invalid markup pattern")
});

static DANGEROUS_SCHEMES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(javascript|vbscript|data)\s*:").expect("invalid scheme pattern")
});

/// Ordered risk classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

/// Result of a single content check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub valid: bool,
    /// Allow-listed markup only; for audit when `blocked`
    pub sanitized: String,
    pub threats: Vec<String>,
    pub risk_level: RiskLevel,
    /// 0 (hostile) to 100 (clean)
    pub security_score: u8,
    pub blocked: bool,
    /// Usage error (e.g. empty text); not a security event
    pub rejection: Option<String>,
}

/// Stateless content checker
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentValidator;

impl ContentValidator {
    pub fn new() -> Self {
        Self
    }

    /// Classify `text` against a `max_length` in characters
    pub fn validate(&self, text: &str, max_length: usize) -> ValidationVerdict {
        if text.trim().is_empty() {
            debug!("Rejected empty content");
            return ValidationVerdict {
                valid: false,
                sanitized: sanitize(text),
                threats: Vec::new(),
                risk_level: RiskLevel::Low,
                security_score: 0,
                blocked: false,
                rejection: Some("Content cannot be empty".to_string()),
            };
        }

        let mut threats = Vec::new();
        let mut score = MAX_SCORE;
        let mut risk = RiskLevel::Low;
        let mut blocked = false;

        let length = text.chars().count();
        if length > max_length {
            debug!("Content length {} exceeds maximum {}", length, max_length);
            threats.push(THREAT_TOO_LONG.to_string());
            score -= LENGTH_PENALTY;
            risk = risk.max(RiskLevel::Medium);
        }

        if let Some(pattern) = first_match(&XSS_PATTERNS, text) {
            warn!(threat = THREAT_XSS, pattern = pattern, "Content blocked");
            threats.push(THREAT_XSS.to_string());
            score = 0;
            risk = RiskLevel::Critical;
            blocked = true;
        } else if let Some(pattern) = first_match(&SQL_PATTERNS, text) {
            warn!(threat = THREAT_SQL, pattern = pattern, "Content blocked");
            threats.push(THREAT_SQL.to_string());
            score -= SQL_PENALTY;
            risk = risk.max(RiskLevel::High);
            blocked = true;
        }

        ValidationVerdict {
            valid: !blocked && threats.is_empty(),
            sanitized: sanitize(text),
            threats,
            risk_level: risk,
            security_score: score.clamp(0, MAX_SCORE) as u8,
            blocked,
            rejection: None,
        }
    }

    pub fn sanitize(&self, text: &str) -> String {
        sanitize(text)
    }

    /// Trim, cap at `max_length` characters, then sanitize. For display-only
    /// fields that are not gated (nicknames, campaign titles).
    pub fn sanitize_input(&self, text: &str, max_length: usize) -> String {
        let capped: String = text.trim().chars().take(max_length).collect();
        sanitize(&capped)
    }
}

fn first_match(patterns: &[ThreatPattern], text: &str) -> Option<&'static str> {
    patterns
        .iter()
        .find(|p| p.regex.is_match(text))
        .map(|p| p.name)
}

/// Strip every tag outside the allow-list, drop attributes from kept tags,
/// escape stray `<`/`>`, then strip `javascript:`/`vbscript:`/`data:`
/// remnants. Repeats until nothing changes, so the output is a fixed point.
/// The only brackets in the output belong to allow-listed tags.
pub fn sanitize(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = sanitize_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn sanitize_pass(text: &str) -> String {
    let tags_cleaned = MARKUP.replace_all(text, |caps: &regex::Captures| normalize_markup(caps));
    DANGEROUS_SCHEMES.replace_all(&tags_cleaned, "").into_owned()
}

fn normalize_markup(caps: &regex::Captures) -> String {
    let Some(name) = caps.get(2) else {
        return match &caps[0] {
            "<" => "&lt;".to_string(),
            _ => "&gt;".to_string(),
        };
    };

    let closing = &caps[1];
    let name = name.as_str().to_ascii_lowercase();
    if !ALLOWED_TAGS.contains(&name.as_str()) {
        return String::new();
    }

    // <br> has no closing form
    if name == "br" {
        return "<br>".to_string();
    }
    format!("<{}{}>", closing, name)
}
