//! ============================================================================
//! Supabase RPC Client - remote rate limit, beta codes and balances
//! ============================================================================
//! Every call is a single POST to `{base}/rest/v1/rpc/{function}` with the
//! anon key as `apikey` and bearer token. No retries; callers decide what an
//! unavailable remote means.
//! ============================================================================

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::access::BalanceSource;
use crate::beta::{parse_beta_code_response, BetaCodeOutcome, BetaCodeVerifier};
use crate::config::GateConfig;
use crate::error::{GateError, Result};
use crate::rate_limit::{
    parse_rate_limit_response, RemoteRateLimitRequest, RemoteRateLimitResponse, RemoteRateLimiter,
};

const RATE_LIMIT_FN: &str = "check_rate_limit";
const BETA_CODE_FN: &str = "validate_beta_code";
const BALANCE_FN: &str = "get_token_balance";

/// Client for the gate's Supabase RPC functions
pub struct SupabaseClient {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self> {
        Self::with_client(reqwest::Client::new(), base_url, anon_key)
    }

    fn with_client(client: reqwest::Client, base_url: &str, anon_key: &str) -> Result<Self> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| GateError::Config(format!("Invalid Supabase URL '{}': {}", base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(GateError::Config(format!(
                "Supabase URL must be http(s), got '{}'",
                parsed.scheme()
            )));
        }

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        })
    }

    /// Client from configuration; `None` when remote checks are not configured
    pub fn from_config(config: &GateConfig) -> Result<Option<Self>> {
        let (Some(url), Some(key)) = (&config.supabase_url, &config.supabase_anon_key) else {
            return Ok(None);
        };

        let client = reqwest::Client::builder()
            .timeout(config.rpc_timeout())
            .build()
            .map_err(|e| GateError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Self::with_client(client, url, key).map(Some)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, function)
    }

    async fn call_rpc<B: Serialize + ?Sized>(
        &self,
        function: &str,
        body: &B,
    ) -> Result<serde_json::Value> {
        let url = self.rpc_url(function);
        debug!("Calling Supabase RPC {}", function);

        let response = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GateError::Remote(format!(
                "{} returned {}: {}",
                function,
                status,
                text.chars().take(200).collect::<String>()
            )));
        }

        response.json().await.map_err(|e| GateError::MalformedResponse {
            service: "supabase",
            detail: format!("{} body is not JSON: {}", function, e),
        })
    }
}

#[async_trait]
impl RemoteRateLimiter for SupabaseClient {
    async fn check(&self, request: &RemoteRateLimitRequest) -> Result<RemoteRateLimitResponse> {
        let value = self.call_rpc(RATE_LIMIT_FN, request).await?;
        parse_rate_limit_response(value)
    }
}

#[async_trait]
impl BetaCodeVerifier for SupabaseClient {
    async fn verify(&self, code: &str) -> Result<BetaCodeOutcome> {
        let value = self.call_rpc(BETA_CODE_FN, &json!({ "code": code })).await?;
        Ok(parse_beta_code_response(value))
    }
}

#[async_trait]
impl BalanceSource for SupabaseClient {
    async fn balance(&self, wallet: &str) -> Result<f64> {
        let value = self.call_rpc(BALANCE_FN, &json!({ "wallet": wallet })).await?;
        parse_balance_response(value)
    }
}

/// Balance RPC answer: a number, a numeric string, or `{balance}`
pub fn parse_balance_response(value: serde_json::Value) -> Result<f64> {
    let value = match value {
        serde_json::Value::Array(mut rows) if rows.len() == 1 => rows.remove(0),
        other => other,
    };

    let balance = match &value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        serde_json::Value::Object(map) => map.get("balance").and_then(|b| match b {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }),
        _ => None,
    };

    balance
        .filter(|b| b.is_finite())
        .ok_or_else(|| GateError::MalformedResponse {
            service: "balance",
            detail: format!("unexpected balance payload: {}", value),
        })
}
