//! HTTP adapter for a remote screening provider.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::warn;

use shared_types::{CoreError, CoreResult, Direction, EthAddress};

use crate::ports::{RiskLevel, RiskOracle};

/// Remote screening provider over HTTP.
///
/// Concurrency toward the vendor is bounded by a semaphore; every request
/// carries a deadline, and transport failures surface as transient errors
/// for the screening service to apply its fallback policy.
pub struct HttpRiskOracle {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    permits: Semaphore,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    risk_level: Option<String>,
}

impl HttpRiskOracle {
    pub fn new(base_url: &str, api_key: Option<&str>, max_concurrency: usize) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CoreError::Configuration(format!("screener http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
            permits: Semaphore::new(max_concurrency.max(1)),
        })
    }

    async fn check(&self, path: &str, body: serde_json::Value) -> CoreResult<RiskLevel> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| CoreError::TransientRemote("screener client closed".into()))?;

        let mut request = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CoreError::TransientRemote(format!("screener unreachable: {e}")))?;

        if response.status().is_server_error() {
            return Err(CoreError::TransientRemote(format!(
                "screener returned {}",
                response.status()
            )));
        }
        if !response.status().is_success() {
            return Err(CoreError::PermanentRemote(format!(
                "screener rejected request: {}",
                response.status()
            )));
        }

        let parsed: CheckResponse = response
            .json()
            .await
            .map_err(|e| CoreError::TransientRemote(format!("screener body: {e}")))?;
        Ok(parse_risk(parsed.risk_level.as_deref()))
    }
}

fn parse_risk(raw: Option<&str>) -> RiskLevel {
    match raw.map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("none") => RiskLevel::None,
        Some("low") => RiskLevel::Low,
        Some("medium") => RiskLevel::Medium,
        Some("high") => RiskLevel::High,
        Some("severe") => RiskLevel::Severe,
        other => {
            warn!(level = ?other, "unrecognized provider risk level");
            RiskLevel::Undefined
        }
    }
}

#[async_trait]
impl RiskOracle for HttpRiskOracle {
    async fn address_risk(
        &self,
        network: &str,
        address: &EthAddress,
        direction: Direction,
    ) -> CoreResult<RiskLevel> {
        self.check(
            "v1/address/check",
            json!({
                "network": network,
                "address": address.as_str(),
                "direction": direction,
            }),
        )
        .await
    }

    async fn transfer_risk(
        &self,
        network: &str,
        tx_hash: &str,
        direction: Direction,
    ) -> CoreResult<RiskLevel> {
        self.check(
            "v1/transfer/check",
            json!({
                "network": network,
                "tx_hash": tx_hash,
                "direction": direction,
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_risk_levels() {
        assert_eq!(parse_risk(Some("LOW")), RiskLevel::Low);
        assert_eq!(parse_risk(Some("severe")), RiskLevel::Severe);
        assert_eq!(parse_risk(Some("weird")), RiskLevel::Undefined);
        assert_eq!(parse_risk(None), RiskLevel::Undefined);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        let oracle = HttpRiskOracle::new("http://127.0.0.1:1", None, 4).unwrap();
        let addr = EthAddress::parse("0xbb00000000000000000000000000000000000001").unwrap();
        let err = oracle
            .address_risk("ETH", &addr, Direction::Outbound)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
