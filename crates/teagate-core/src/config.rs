//! ============================================================================
//! Gate Configuration - environment-driven settings
//! ============================================================================
//! Read from TEAGATE_* environment variables (the binary loads `.env` first).
//! Production is the default mode; development must be opted into.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{GateError, Result};

/// Default timeout for a single remote RPC round trip
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 3_000;

/// Build/runtime mode. Development exposes verbose diagnostics and debug codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    Development,
    #[default]
    Production,
}

impl RuntimeMode {
    pub fn is_development(&self) -> bool {
        matches!(self, RuntimeMode::Development)
    }
}

/// What to do when the authoritative rate-limit RPC cannot answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Decide with the client-local counter (availability over safety)
    #[default]
    Local,
    /// Deny the action with an infrastructure reason
    FailClosed,
}

/// Gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    pub mode: RuntimeMode,
    /// Supabase project URL; remote checks are disabled when absent
    pub supabase_url: Option<String>,
    /// Supabase anon key sent as `apikey` / bearer
    pub supabase_anon_key: Option<String>,
    pub rpc_timeout_ms: u64,
    pub fallback_policy: FallbackPolicy,
    /// Local-scope database path; None means ~/.teagate/state.redb
    pub db_path: Option<PathBuf>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            mode: RuntimeMode::Production,
            supabase_url: None,
            supabase_anon_key: None,
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            fallback_policy: FallbackPolicy::Local,
            db_path: None,
        }
    }
}

impl GateConfig {
    /// Build from process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = match lookup("TEAGATE_MODE").as_deref().map(str::trim) {
            None | Some("") => RuntimeMode::Production,
            Some(m) => match m.to_lowercase().as_str() {
                "development" | "dev" => RuntimeMode::Development,
                "production" | "prod" => RuntimeMode::Production,
                other => {
                    return Err(GateError::Config(format!(
                        "Unknown TEAGATE_MODE '{}'. Valid values: development, production",
                        other
                    )))
                }
            },
        };

        let fallback_policy = match lookup("TEAGATE_FALLBACK_POLICY").as_deref().map(str::trim) {
            None | Some("") => FallbackPolicy::Local,
            Some(p) => match p.to_lowercase().as_str() {
                "local" => FallbackPolicy::Local,
                "fail_closed" | "fail-closed" => FallbackPolicy::FailClosed,
                other => {
                    return Err(GateError::Config(format!(
                        "Unknown TEAGATE_FALLBACK_POLICY '{}'. Valid values: local, fail_closed",
                        other
                    )))
                }
            },
        };

        let rpc_timeout_ms = match lookup("TEAGATE_RPC_TIMEOUT_MS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                GateError::Config(format!("Invalid TEAGATE_RPC_TIMEOUT_MS '{}': {}", raw, e))
            })?,
            None => DEFAULT_RPC_TIMEOUT_MS,
        };

        Ok(Self {
            mode,
            supabase_url: lookup("TEAGATE_SUPABASE_URL").filter(|s| !s.trim().is_empty()),
            supabase_anon_key: lookup("TEAGATE_SUPABASE_ANON_KEY").filter(|s| !s.trim().is_empty()),
            rpc_timeout_ms,
            fallback_policy,
            db_path: lookup("TEAGATE_DB_PATH").map(PathBuf::from),
        })
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// True when both the project URL and key are present
    pub fn remote_enabled(&self) -> bool {
        self.supabase_url.is_some() && self.supabase_anon_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_production() {
        let config = GateConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.mode, RuntimeMode::Production);
        assert_eq!(config.fallback_policy, FallbackPolicy::Local);
        assert_eq!(config.rpc_timeout_ms, DEFAULT_RPC_TIMEOUT_MS);
        assert!(!config.remote_enabled());
    }

    #[test]
    fn test_full_environment() {
        let config = GateConfig::from_lookup(lookup_from(&[
            ("TEAGATE_MODE", "Development"),
            ("TEAGATE_SUPABASE_URL", "https://abc.supabase.co"),
            ("TEAGATE_SUPABASE_ANON_KEY", "anon"),
            ("TEAGATE_RPC_TIMEOUT_MS", "1500"),
            ("TEAGATE_FALLBACK_POLICY", "fail-closed"),
            ("TEAGATE_DB_PATH", "/tmp/tea.redb"),
        ]))
        .unwrap();

        assert!(config.mode.is_development());
        assert!(config.remote_enabled());
        assert_eq!(config.rpc_timeout(), Duration::from_millis(1500));
        assert_eq!(config.fallback_policy, FallbackPolicy::FailClosed);
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/tea.redb")));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(GateConfig::from_lookup(lookup_from(&[("TEAGATE_MODE", "staging")])).is_err());
        assert!(GateConfig::from_lookup(lookup_from(&[("TEAGATE_RPC_TIMEOUT_MS", "soon")])).is_err());
        assert!(
            GateConfig::from_lookup(lookup_from(&[("TEAGATE_FALLBACK_POLICY", "maybe")])).is_err()
        );
    }

    #[test]
    fn test_blank_remote_settings_disable_remote() {
        let config = GateConfig::from_lookup(lookup_from(&[
            ("TEAGATE_SUPABASE_URL", "  "),
            ("TEAGATE_SUPABASE_ANON_KEY", "anon"),
        ]))
        .unwrap();
        assert!(!config.remote_enabled());
    }
}
