//! Screening service: list composition, caching, fallback, cases.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use custody_audit::{AuditRecord, AuditService};
use custody_store::{AuditStore, CaseStore};
use shared_types::{
    AuditEventType, CaseStatus, CoreConfig, CoreError, CoreResult, Direction, EthAddress, KytCase,
    Verdict,
};

use crate::cache::RiskCache;
use crate::ports::{RiskLevel, RiskOracle};

/// Screening configuration distilled from [`CoreConfig`].
#[derive(Clone, Debug)]
pub struct ScreenerConfig {
    pub network: String,
    pub remote_enabled: bool,
    pub fallback_on_error: bool,
    pub cache_ttl: Duration,
    deny_list: HashSet<String>,
    review_list: HashSet<String>,
}

impl ScreenerConfig {
    pub fn from_core(config: &CoreConfig) -> Self {
        Self {
            network: "ETH".to_string(),
            remote_enabled: config.screener_remote_enabled,
            fallback_on_error: config.screener_fallback_on_error,
            cache_ttl: Duration::from_secs(config.screener_cache_ttl_hours * 3600),
            deny_list: config
                .blacklist_addresses()
                .iter()
                .map(|a| a.as_str().to_string())
                .collect(),
            review_list: config
                .graylist_addresses()
                .iter()
                .map(|a| a.as_str().to_string())
                .collect(),
        }
    }
}

/// Verdict severity for the more-restrictive-wins merge.
fn restrictiveness(verdict: Verdict) -> u8 {
    match verdict {
        Verdict::Allow => 0,
        Verdict::Unchecked => 1,
        Verdict::Review => 2,
        Verdict::Block => 3,
    }
}

/// The screening (KYT) service.
pub struct ScreeningService<S, O> {
    store: Arc<S>,
    audit: Arc<AuditService<S>>,
    oracle: Arc<O>,
    cache: RiskCache,
    config: ScreenerConfig,
}

impl<S: CaseStore + AuditStore, O: RiskOracle> ScreeningService<S, O> {
    pub fn new(
        store: Arc<S>,
        audit: Arc<AuditService<S>>,
        oracle: Arc<O>,
        config: ScreenerConfig,
    ) -> Self {
        let cache = RiskCache::new(config.cache_ttl);
        Self {
            store,
            audit,
            oracle,
            cache,
            config,
        }
    }

    /// Screen the recipient of an outbound transfer. Opens a PENDING case
    /// when the verdict is REVIEW.
    pub async fn evaluate_outbound(
        &self,
        address: &EthAddress,
        tx_request_id: Uuid,
        actor_id: Option<Uuid>,
        correlation_id: &str,
    ) -> CoreResult<(Verdict, Option<KytCase>)> {
        let (verdict, reason, provider_risk, cached) = self
            .screen_address(address, Direction::Outbound, "Address")
            .await;

        let mut case = None;
        if verdict == Verdict::Review {
            let opened = KytCase::new(
                address.clone(),
                Direction::Outbound,
                reason.clone().unwrap_or_else(|| "Requires manual review".into()),
                CaseStatus::Pending,
            );
            self.store.insert_case(opened.clone()).await?;
            self.audit
                .log(
                    AuditRecord::system(AuditEventType::KytCaseCreated, correlation_id)
                        .actor(actor_id)
                        .entity("KYT_CASE", opened.id)
                        .payload(json!({
                            "address": address.as_str(),
                            "direction": Direction::Outbound,
                            "reason": reason,
                            "tx_request_id": tx_request_id.to_string(),
                        })),
                )
                .await?;
            case = Some(opened);
        }

        self.audit
            .log(
                AuditRecord::system(AuditEventType::TxKytEvaluated, correlation_id)
                    .actor(actor_id)
                    .entity("TX_REQUEST", tx_request_id)
                    .payload(json!({
                        "address": address.as_str(),
                        "direction": Direction::Outbound,
                        "result": verdict,
                        "reason": reason,
                        "case_id": case.as_ref().map(|c| c.id.to_string()),
                        "remote_enabled": self.config.remote_enabled,
                        "provider_risk": provider_risk,
                        "cached": cached,
                    })),
            )
            .await?;

        info!(address = %address, ?verdict, "outbound screening complete");
        Ok((verdict, case))
    }

    /// Screen the sender of an inbound deposit. REVIEW opens a PENDING
    /// case; BLOCK records a case born RESOLVED_BLOCK for the paper trail.
    pub async fn evaluate_inbound(
        &self,
        from_address: &EthAddress,
        to_wallet_id: Uuid,
        tx_hash: &str,
        correlation_id: &str,
    ) -> CoreResult<(Verdict, Option<KytCase>)> {
        let (local_verdict, local_reason, _, _) = self
            .screen_address(from_address, Direction::Inbound, "Sender address")
            .await;

        // Inbound remote checks are keyed by the observed transaction, not
        // the address.
        let mut verdict = local_verdict;
        let mut reason = local_reason;
        let mut provider_risk = None;
        let mut cached = false;
        if verdict != Verdict::Block && self.config.remote_enabled {
            let key = (
                self.config.network.clone(),
                tx_hash.to_string(),
                Direction::Inbound,
            );
            let outcome = match self.cache.get(&key).await {
                Some(risk) => {
                    cached = true;
                    Ok(risk)
                }
                None => {
                    self.oracle
                        .transfer_risk(&self.config.network, tx_hash, Direction::Inbound)
                        .await
                }
            };
            (verdict, reason, provider_risk) = self
                .merge_remote(outcome, key, cached, verdict, reason)
                .await;
        }

        let mut case = None;
        if matches!(verdict, Verdict::Review | Verdict::Block) {
            let status = if verdict == Verdict::Review {
                CaseStatus::Pending
            } else {
                CaseStatus::ResolvedBlock
            };
            let opened = KytCase::new(
                from_address.clone(),
                Direction::Inbound,
                reason.clone().unwrap_or_else(|| "Requires manual review".into()),
                status,
            );
            self.store.insert_case(opened.clone()).await?;
            self.audit
                .log(
                    AuditRecord::system(AuditEventType::KytCaseCreated, correlation_id)
                        .entity("KYT_CASE", opened.id)
                        .payload(json!({
                            "address": from_address.as_str(),
                            "direction": Direction::Inbound,
                            "reason": reason,
                            "wallet_id": to_wallet_id.to_string(),
                            "tx_hash": tx_hash,
                        })),
                )
                .await?;
            case = Some(opened);
        }

        self.audit
            .log(
                AuditRecord::system(AuditEventType::DepositKytEvaluated, correlation_id)
                    .entity("WALLET", to_wallet_id)
                    .payload(json!({
                        "from_address": from_address.as_str(),
                        "tx_hash": tx_hash,
                        "result": verdict,
                        "reason": reason,
                        "case_id": case.as_ref().map(|c| c.id.to_string()),
                        "remote_enabled": self.config.remote_enabled,
                        "provider_risk": provider_risk,
                        "cached": cached,
                    })),
            )
            .await?;

        Ok((verdict, case))
    }

    /// Local lists, then the remote provider through the cache.
    async fn screen_address(
        &self,
        address: &EthAddress,
        direction: Direction,
        subject: &str,
    ) -> (Verdict, Option<String>, Option<RiskLevel>, bool) {
        let mut verdict = Verdict::Allow;
        let mut reason = None;

        if self.config.deny_list.contains(address.as_str()) {
            return (
                Verdict::Block,
                Some(format!("{subject} is on the local deny list")),
                None,
                false,
            );
        }
        if self.config.review_list.contains(address.as_str()) {
            verdict = Verdict::Review;
            reason = Some(format!("{subject} requires manual review (local list)"));
        }

        if !self.config.remote_enabled || direction == Direction::Inbound {
            // Inbound remote checks run against the transaction hash in
            // `evaluate_inbound`; only the local lists apply here.
            return (verdict, reason, None, false);
        }

        let key = (
            self.config.network.clone(),
            address.as_str().to_string(),
            direction,
        );
        let mut cached = false;
        let outcome = match self.cache.get(&key).await {
            Some(risk) => {
                cached = true;
                Ok(risk)
            }
            None => {
                self.oracle
                    .address_risk(&self.config.network, address, direction)
                    .await
            }
        };
        let (verdict, reason, provider_risk) = self
            .merge_remote(outcome, key, cached, verdict, reason)
            .await;
        (verdict, reason, provider_risk, cached)
    }

    /// Fold the provider result (or failure) into the local verdict:
    /// more restrictive wins; failures apply the fallback flag.
    async fn merge_remote(
        &self,
        outcome: CoreResult<RiskLevel>,
        key: crate::cache::CacheKey,
        already_cached: bool,
        mut verdict: Verdict,
        mut reason: Option<String>,
    ) -> (Verdict, Option<String>, Option<RiskLevel>) {
        match outcome {
            Ok(risk) => {
                if !already_cached {
                    self.cache.put(key, risk).await;
                }
                let remote = risk.to_verdict();
                if restrictiveness(remote) > restrictiveness(verdict) {
                    verdict = remote;
                    reason = Some(format!("Provider reported {risk:?} risk"));
                }
                (verdict, reason, Some(risk))
            }
            Err(err) => {
                warn!(%err, "remote screening failed");
                if self.config.fallback_on_error {
                    if verdict == Verdict::Allow {
                        verdict = Verdict::Unchecked;
                        reason =
                            Some("Remote screening unavailable; passed as UNCHECKED".to_string());
                    }
                } else if restrictiveness(Verdict::Review) > restrictiveness(verdict) {
                    verdict = Verdict::Review;
                    reason =
                        Some("Remote screening unavailable; promoted to REVIEW".to_string());
                }
                (verdict, reason, None)
            }
        }
    }

    /// Human adjudication of a pending case.
    pub async fn resolve_case(
        &self,
        case_id: Uuid,
        allow: bool,
        resolved_by: Uuid,
        comment: Option<&str>,
        correlation_id: &str,
    ) -> CoreResult<KytCase> {
        let mut case = self
            .store
            .case(case_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity: "kyt_case",
                id: case_id.to_string(),
            })?;
        if case.status != CaseStatus::Pending {
            return Err(CoreError::Conflict(format!(
                "case {case_id} is already resolved"
            )));
        }

        case.status = if allow {
            CaseStatus::ResolvedAllow
        } else {
            CaseStatus::ResolvedBlock
        };
        case.resolved_by = Some(resolved_by);
        case.resolved_at = Some(Utc::now());
        case.resolution_comment = comment.map(str::to_string);
        self.store.update_case(case.clone()).await?;

        self.audit
            .log(
                AuditRecord::user(AuditEventType::KytCaseResolved, correlation_id, resolved_by)
                    .entity("KYT_CASE", case_id)
                    .payload(json!({
                        "decision": case.status,
                        "comment": comment,
                    })),
            )
            .await?;
        Ok(case)
    }

    pub async fn case(&self, case_id: Uuid) -> CoreResult<Option<KytCase>> {
        self.store.case(case_id).await
    }

    pub async fn list_cases(
        &self,
        status: Option<CaseStatus>,
        direction: Option<Direction>,
    ) -> CoreResult<Vec<KytCase>> {
        self.store.list_cases(status, direction).await
    }
}
