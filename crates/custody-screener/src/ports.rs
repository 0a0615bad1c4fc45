//! Remote risk-provider port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use shared_types::{CoreResult, Direction, EthAddress, Verdict};

/// Risk levels as reported by a screening provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
    Severe,
    /// Provider answered but the level is missing or unrecognized.
    Undefined,
}

impl RiskLevel {
    /// Map a provider risk level onto a screening verdict.
    pub fn to_verdict(self) -> Verdict {
        match self {
            Self::None | Self::Low => Verdict::Allow,
            Self::Medium | Self::High => Verdict::Review,
            Self::Severe => Verdict::Block,
            Self::Undefined => Verdict::Review,
        }
    }
}

/// A remote screening provider.
///
/// Implementations: [`crate::HttpRiskOracle`] against the vendor API, and
/// [`crate::HashRiskOracle`] for deterministic test/demo behavior.
#[async_trait]
pub trait RiskOracle: Send + Sync {
    /// Risk of a counterparty address.
    async fn address_risk(
        &self,
        network: &str,
        address: &EthAddress,
        direction: Direction,
    ) -> CoreResult<RiskLevel>;

    /// Risk of an observed on-chain transaction.
    async fn transfer_risk(
        &self,
        network: &str,
        tx_hash: &str,
        direction: Direction,
    ) -> CoreResult<RiskLevel>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_mapping() {
        assert_eq!(RiskLevel::None.to_verdict(), Verdict::Allow);
        assert_eq!(RiskLevel::Low.to_verdict(), Verdict::Allow);
        assert_eq!(RiskLevel::Medium.to_verdict(), Verdict::Review);
        assert_eq!(RiskLevel::High.to_verdict(), Verdict::Review);
        assert_eq!(RiskLevel::Severe.to_verdict(), Verdict::Block);
        assert_eq!(RiskLevel::Undefined.to_verdict(), Verdict::Review);
    }
}
