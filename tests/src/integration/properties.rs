//! System invariants, quantified over the flows the scenarios exercise.

use primitive_types::U256;

use custody_audit::event_hash;
use custody_policy::rules_snapshot_hash;
use custody_store::{ApprovalStore, AuditStore, DepositStore, PermitStore, PolicyStore, TxStore};
use shared_types::{ApprovalDecision, AuditEventType, CoreError, TxStatus};

use crate::harness::{Harness, MILLI_ETH, ONE_ETH};

/// Illegal moves leave the row byte-identical: entry points that imply a
/// transition refuse out-of-state requests without touching them.
#[tokio::test]
async fn test_transition_soundness_on_illegal_attempts() {
    let h = Harness::new().await;
    let wallet = h.local_wallet().await;
    let tx = h
        .submit(wallet.id, h.alice, &h.allowlisted.clone(), U256::from(MILLI_ETH), None)
        .await
        .unwrap();
    let finalized = h.confirm_to_finality(tx.id).await;
    assert_eq!(finalized.status, TxStatus::Finalized);
    let before = serde_json::to_value(&finalized).unwrap();

    // Approving a finalized request.
    assert!(matches!(
        h.orchestrator
            .approve(tx.id, h.bob, ApprovalDecision::Approved, None, "p1")
            .await,
        Err(CoreError::Conflict(_))
    ));
    // Resuming KYT on a request that never entered review.
    assert!(h.orchestrator.resolve_kyt(tx.id, "p1").await.is_err());
    // Re-broadcasting a finalized request.
    assert!(h.orchestrator.retry_broadcast(tx.id, "p1").await.is_err());
    // Finalizing a signature for a request past signing.
    assert!(h
        .orchestrator
        .mpc_finalize(
            tx.id,
            shared_types::SigningSignature {
                r: [1u8; 32],
                s: [2u8; 32],
                v: 27,
            },
            "p1",
        )
        .await
        .is_err());
    // Confirmation checks on non-confirming requests are no-ops.
    h.orchestrator.check_confirmation(tx.id, "p1").await.unwrap();

    let after = serde_json::to_value(&h.store_tx(tx.id).await).unwrap();
    assert_eq!(before, after);
}

/// The audit log is a dense, strictly increasing, correctly linked and
/// reproducible hash chain.
#[tokio::test]
async fn test_audit_chain_shape() {
    let h = Harness::new().await;
    let wallet = h.local_wallet().await;
    let tx = h
        .submit(wallet.id, h.alice, &h.allowlisted.clone(), U256::from(MILLI_ETH), None)
        .await
        .unwrap();
    h.confirm_to_finality(tx.id).await;

    let events = h.store.audit_range(None, None).await.unwrap();
    assert!(!events.is_empty());

    let mut prev_hash: Option<String> = None;
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.sequence_number, i as u64 + 1, "dense sequence");
        assert_eq!(event.prev_hash, prev_hash, "chain linkage at {}", event.sequence_number);
        assert_eq!(
            event_hash(event).unwrap(),
            event.hash,
            "hash reproducibility at {}",
            event.sequence_number
        );
        prev_hash = Some(event.hash.clone());
    }

    let report = h.audit.verify_chain(None, None).await.unwrap();
    assert!(report.is_valid);
    assert_eq!(report.verified_events, events.len());
}

/// Any field mutation is detected, whichever field is hit.
#[tokio::test]
async fn test_tamper_detection_on_any_field() {
    let h = Harness::new().await;
    let wallet = h.local_wallet().await;
    let tx = h
        .submit(wallet.id, h.alice, &h.allowlisted.clone(), U256::from(MILLI_ETH), None)
        .await
        .unwrap();
    h.confirm_to_finality(tx.id).await;

    // Tamper with the event type of event 2.
    let mut victim = h.store.audit_by_sequence(2).await.unwrap().unwrap();
    victim.event_type = AuditEventType::TxFinalized;
    h.store.overwrite_audit_event(2, victim).await;
    let report = h.audit.verify_chain(None, None).await.unwrap();
    assert!(!report.is_valid);
    assert!(report.errors.iter().any(|f| f.sequence_number == 2));
}

/// No two signing events share a permit, and every consumed permit has a
/// consumption timestamp.
#[tokio::test]
async fn test_permit_single_use() {
    let h = Harness::new().await;
    let wallet = h.local_wallet().await;

    for i in 1..=3u64 {
        let tx = h
            .submit(
                wallet.id,
                h.alice,
                &h.allowlisted.clone(),
                U256::from(i * 100_000_000_000_000u64),
                None,
            )
            .await
            .unwrap();
        let permits = h.store.permits_for_tx(tx.id).await.unwrap();
        assert_eq!(permits.len(), 1);
        let permit = &permits[0];
        assert!(permit.is_used);
        assert!(permit.used_at.is_some());
        assert!(permit.used_at.unwrap() <= chrono::Utc::now());

        // Re-presentation of a used permit is refused permanently.
        assert!(matches!(
            h.permits.consume(permit.id).await,
            Err(CoreError::PermitInvalid(_))
        ));
    }
}

/// No approval row ever carries the creator's user id.
#[tokio::test]
async fn test_sod_invariant_across_requests() {
    let h = Harness::new().await;
    let (wallet, _) = h.mpc_wallet().await;
    h.fund_wallet(wallet.id, U256::from(ONE_ETH)).await;

    let tx = h
        .submit(wallet.id, h.alice, &h.allowlisted.clone(), U256::from(5 * MILLI_ETH), None)
        .await
        .unwrap();
    let _ = h
        .orchestrator
        .approve(tx.id, h.alice, ApprovalDecision::Approved, None, "sod")
        .await;
    h.orchestrator
        .approve(tx.id, h.bob, ApprovalDecision::Approved, None, "sod")
        .await
        .unwrap();

    let approvals = h.store.approvals_for(tx.id).await.unwrap();
    let tx = h.store_tx(tx.id).await;
    assert!(!approvals.is_empty());
    assert!(approvals.iter().all(|a| a.user_id != tx.created_by));
}

/// Two creates under one idempotency key return the same id and leave
/// exactly one row.
#[tokio::test]
async fn test_idempotent_create() {
    let h = Harness::new().await;
    let wallet = h.local_wallet().await;

    let first = h
        .submit(wallet.id, h.alice, &h.allowlisted.clone(), U256::from(MILLI_ETH), Some("replay-key"))
        .await
        .unwrap();
    // Different payload, same key: the original row comes back unchanged.
    let second = h
        .submit(
            wallet.id,
            h.alice,
            &h.allowlisted.clone(),
            U256::from(7 * MILLI_ETH),
            Some("replay-key"),
        )
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.amount_wei, U256::from(MILLI_ETH));

    let all_statuses = [
        TxStatus::Confirming,
        TxStatus::Finalized,
        TxStatus::Submitted,
    ];
    let mut count = 0;
    for status in all_statuses {
        count += h.store.txs_by_status(status).await.unwrap().len();
    }
    assert_eq!(count, 1);
}

/// Every evaluated request lists at least one matched rule, and each
/// listed rule id exists in the policy set whose snapshot hash the result
/// committed to.
#[tokio::test]
async fn test_policy_explainability() {
    let h = Harness::new().await;
    let wallet = h.local_wallet().await;

    for amount in [U256::from(MILLI_ETH / 2), U256::from(5 * MILLI_ETH)] {
        let tx = h
            .submit(wallet.id, h.alice, &h.allowlisted.clone(), amount, None)
            .await
            .unwrap();
        let policy = tx.policy_result.as_ref().expect("evaluated");
        let matched: Vec<String> = policy["matched_rules"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert!(!matched.is_empty());

        let snapshot_hash = policy["policy_snapshot_hash"].as_str().unwrap();
        let set = h
            .store
            .active_set_for_group(h.retail_group)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(set.snapshot_hash.as_deref(), Some(snapshot_hash));
        assert_eq!(rules_snapshot_hash(&set.rules).unwrap(), snapshot_hash);
        for rule_id in &matched {
            assert!(
                set.rules.iter().any(|r| &r.rule_id == rule_id),
                "rule {rule_id} must exist in the committed set"
            );
        }
    }
}

/// Finalized outbound volume never exceeds credited deposits on an MPC
/// wallet.
#[tokio::test]
async fn test_ledger_invariant() {
    let h = Harness::new().await;
    let (wallet, _) = h.mpc_wallet().await;
    h.fund_wallet(wallet.id, U256::from(ONE_ETH)).await;

    let amount = U256::from(900_000_000_000_000u64); // fast-path tier
    let tx = h
        .submit(wallet.id, h.alice, &h.allowlisted.clone(), amount, None)
        .await
        .unwrap();
    assert_eq!(tx.status, TxStatus::SignPending);
    let tx = h.complete_mpc_signing(tx.id, h.alice).await;
    let finalized = h.confirm_to_finality(tx.id).await;
    assert_eq!(finalized.status, TxStatus::Finalized);

    let spent = h.store.finalized_total(wallet.id).await.unwrap();
    let credited = h.store.credited_total(wallet.id).await.unwrap();
    assert!(spent <= credited, "spent {spent} must not exceed credited {credited}");
}

/// Nonces across successfully broadcast transactions of one sender are
/// strictly increasing with no gaps.
#[tokio::test]
async fn test_nonce_monotonicity_per_sender() {
    let h = Harness::new().await;
    let wallet = h.local_wallet().await;

    let mut nonces = Vec::new();
    for _ in 0..4 {
        let tx = h
            .submit(wallet.id, h.alice, &h.allowlisted.clone(), U256::from(MILLI_ETH), None)
            .await
            .unwrap();
        assert_eq!(tx.status, TxStatus::Confirming, "broadcast succeeded");
        nonces.push(tx.nonce.unwrap());
    }
    for window in nonces.windows(2) {
        assert_eq!(window[1], window[0] + 1, "no gaps, strictly increasing");
    }
}

/// The per-request audit package commits to the full history and embeds
/// the key evaluations.
#[tokio::test]
async fn test_audit_package_assembly() {
    let h = Harness::new().await;
    let wallet = h.local_wallet().await;
    let tx = h
        .submit(wallet.id, h.alice, &h.allowlisted.clone(), U256::from(MILLI_ETH), None)
        .await
        .unwrap();
    h.confirm_to_finality(tx.id).await;

    let package = h.audit.build_package(tx.id).await.unwrap();
    assert_eq!(package.tx_request_id, tx.id);
    assert!(package.policy_evaluation.is_some());
    assert!(package.signing.is_some());
    assert!(package.broadcast.is_some());
    assert!(!package.audit_events.is_empty());
    assert_eq!(package.package_hash.len(), 64);
    assert_eq!(package.tx_request["status"], "FINALIZED");
}

/// Broadcast retries recover transient chain failures inside the budget;
/// exhausting it parks the request for manual retry.
#[tokio::test]
async fn test_broadcast_retry_budget() {
    let h = Harness::new().await;
    let wallet = h.local_wallet().await;

    // Two transient failures fit inside the three-attempt budget.
    h.chain.fail_broadcasts(2).await;
    let tx = h
        .submit(wallet.id, h.alice, &h.allowlisted.clone(), U256::from(MILLI_ETH), None)
        .await
        .unwrap();
    assert_eq!(tx.status, TxStatus::Confirming);

    // A longer outage exhausts it; manual retry then succeeds.
    h.chain.fail_broadcasts(5).await;
    let stuck = h
        .submit(wallet.id, h.alice, &h.allowlisted.clone(), U256::from(MILLI_ETH), None)
        .await
        .unwrap();
    assert_eq!(stuck.status, TxStatus::FailedBroadcast);

    let recovered = h.orchestrator.retry_broadcast(stuck.id, "manual").await.unwrap();
    assert_eq!(recovered.status, TxStatus::Confirming);

    let trajectory = h.trajectory(stuck.id).await;
    assert!(trajectory.contains(&("BROADCAST_PENDING".into(), "FAILED_BROADCAST".into())));
    assert!(trajectory.contains(&("FAILED_BROADCAST".into(), "BROADCAST_PENDING".into())));
}

/// The chain listener discovers inbound transfers to monitored addresses,
/// records them pending, and only crediting moves the balance.
#[tokio::test]
async fn test_listener_deposit_detection() {
    use custody_orchestrator::ChainListener;
    use shared_types::EthAddress;

    let h = Harness::new().await;
    let (wallet, completion) = h.mpc_wallet().await;
    let wallet_address = EthAddress::parse(&completion.ethereum_address).unwrap();

    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let listener = ChainListener::new(
        h.orchestrator.clone(),
        h.store.clone(),
        h.audit.clone(),
        h.orchestrator.screening().clone(),
        h.chain.clone(),
        h.config.clone(),
        shutdown_rx,
    );

    // Establish the scan window, then land an inbound transfer.
    listener.tick().await.unwrap();
    let from = EthAddress::parse("0xcafe000000000000000000000000000000000001").unwrap();
    let tx_hash = h
        .chain
        .inject_transfer(from.clone(), wallet_address, U256::from(ONE_ETH))
        .await;
    listener.tick().await.unwrap();

    let deposits = h.store.list_deposits(Some(wallet.id)).await.unwrap();
    assert_eq!(deposits.len(), 1);
    let deposit = &deposits[0];
    assert_eq!(deposit.tx_hash, tx_hash);
    assert_eq!(deposit.status, shared_types::DepositStatus::PendingAdmin);
    assert_eq!(deposit.from_address, from);
    assert!(deposit.kyt_result.is_some());

    // Re-scanning the same window never duplicates the record.
    listener.tick().await.unwrap();
    assert_eq!(h.store.list_deposits(Some(wallet.id)).await.unwrap().len(), 1);

    // Detection credits nothing; the administrator does.
    assert_eq!(h.store.credited_total(wallet.id).await.unwrap(), U256::zero());
    h.deposits.credit(deposit.id, h.admin, "credit").await.unwrap();
    assert_eq!(
        h.store.credited_total(wallet.id).await.unwrap(),
        U256::from(ONE_ETH)
    );
}
