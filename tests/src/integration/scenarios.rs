//! End-to-end lifecycle scenarios.

use primitive_types::U256;

use custody_store::{ApprovalStore, AuditStore, PermitStore};
use shared_types::{ApprovalDecision, AuditEventType, CoreError, TxStatus};

use crate::harness::{Harness, MILLI_ETH, ONE_ETH};

/// Micropayment fast path: RET-01, no KYT, no approvals, synchronous
/// signing, broadcast, and finality after the confirmation threshold.
#[tokio::test]
async fn test_micropayment_fast_path_finalizes() {
    let h = Harness::new().await;
    let wallet = h.local_wallet().await;

    let tx = h
        .submit(
            wallet.id,
            h.alice,
            &h.allowlisted.clone(),
            U256::from(900_000_000_000_000u64), // 9e14 wei, under the 0.001 ETH tier
            None,
        )
        .await
        .unwrap();

    let policy = tx.policy_result.as_ref().unwrap();
    assert_eq!(policy["matched_rules"], serde_json::json!(["RET-01"]));
    assert_eq!(policy["kyt_required"], false);
    assert_eq!(policy["approval_required"], false);

    // Local custody signs and broadcasts inside the submit call.
    assert_eq!(tx.status, TxStatus::Confirming);
    assert!(tx.signed_tx.is_some());
    assert!(tx.tx_hash.is_some());

    // A permit was issued and consumed at the signing boundary.
    let permits = h.store.permits_for_tx(tx.id).await.unwrap();
    assert_eq!(permits.len(), 1);
    assert!(permits[0].is_used);

    let finalized = h.confirm_to_finality(tx.id).await;
    assert_eq!(finalized.status, TxStatus::Finalized);
    assert!(finalized.confirmations >= h.config.confirmation_blocks);

    let trajectory = h.trajectory(tx.id).await;
    let expected = [
        ("SUBMITTED", "POLICY_EVAL_PENDING"),
        ("POLICY_EVAL_PENDING", "KYT_SKIPPED"),
        ("KYT_SKIPPED", "APPROVAL_SKIPPED"),
        ("APPROVAL_SKIPPED", "SIGN_PENDING"),
        ("SIGN_PENDING", "SIGNED"),
        ("SIGNED", "BROADCAST_PENDING"),
        ("BROADCAST_PENDING", "BROADCASTED"),
        ("BROADCASTED", "CONFIRMING"),
        ("CONFIRMING", "CONFIRMED"),
        ("CONFIRMED", "FINALIZED"),
    ];
    let got: Vec<(&str, &str)> = trajectory
        .iter()
        .map(|(a, b)| (a.as_str(), b.as_str()))
        .collect();
    assert_eq!(got, expected);
}

/// Large transfer: RET-02 demands KYT and one approval; a second user
/// approves, threshold signing runs, and the request finalizes.
#[tokio::test]
async fn test_large_transfer_with_kyt_and_approval() {
    let h = Harness::new().await;
    let (wallet, _) = h.mpc_wallet().await;
    h.fund_wallet(wallet.id, U256::from(ONE_ETH)).await;

    let tx = h
        .submit(
            wallet.id,
            h.alice,
            &h.allowlisted.clone(),
            U256::from(5 * MILLI_ETH), // 5e15 wei, over the tier boundary
            None,
        )
        .await
        .unwrap();

    let policy = tx.policy_result.as_ref().unwrap();
    assert_eq!(policy["matched_rules"], serde_json::json!(["RET-02"]));
    assert_eq!(tx.status, TxStatus::ApprovalPending);
    assert_eq!(tx.required_approvals, 1);
    assert_eq!(tx.kyt_result, Some(shared_types::Verdict::Allow));

    let (tx, approval) = h
        .orchestrator
        .approve(tx.id, h.bob, ApprovalDecision::Approved, Some("checked".into()), "approve")
        .await
        .unwrap();
    assert_eq!(approval.user_id, h.bob);
    assert_eq!(tx.status, TxStatus::SignPending);

    let tx = h.complete_mpc_signing(tx.id, h.bob).await;
    assert_eq!(tx.status, TxStatus::Confirming);

    let finalized = h.confirm_to_finality(tx.id).await;
    assert_eq!(finalized.status, TxStatus::Finalized);

    let trajectory = h.trajectory(tx.id).await;
    assert!(trajectory.contains(&("POLICY_EVAL_PENDING".into(), "KYT_PENDING".into())));
    assert!(trajectory.contains(&("KYT_PENDING".into(), "APPROVAL_PENDING".into())));
    assert!(trajectory.contains(&("APPROVAL_PENDING".into(), "SIGN_PENDING".into())));
}

/// Denylisted recipient: RET-03 fires at priority 1, the request is
/// terminally blocked, and no permit exists anywhere.
#[tokio::test]
async fn test_denylisted_recipient_is_policy_blocked() {
    let h = Harness::new().await;
    let wallet = h.local_wallet().await;

    let tx = h
        .submit(wallet.id, h.alice, &h.denylisted.clone(), U256::from(123u64), None)
        .await
        .unwrap();

    assert_eq!(tx.status, TxStatus::PolicyBlocked);
    let policy = tx.policy_result.as_ref().unwrap();
    assert_eq!(policy["matched_rules"], serde_json::json!(["RET-03"]));

    assert!(h.store.permits_for_tx(tx.id).await.unwrap().is_empty());
    assert!(tx.signed_tx.is_none());
    assert!(h.chain.broadcast_log().await.is_empty());
}

/// Permit tampering: a signing request for a different digest is refused
/// with `tx_hash mismatch`, the permit stays unused, and the request
/// fails terminally.
#[tokio::test]
async fn test_tampered_signing_request_is_rejected() {
    let h = Harness::new().await;
    let (wallet, _) = h.mpc_wallet().await;
    h.fund_wallet(wallet.id, U256::from(ONE_ETH)).await;

    let tx = h
        .submit(wallet.id, h.alice, &h.allowlisted.clone(), U256::from(5 * MILLI_ETH), None)
        .await
        .unwrap();
    let (tx, _) = h
        .orchestrator
        .approve(tx.id, h.bob, ApprovalDecision::Approved, None, "approve")
        .await
        .unwrap();
    assert_eq!(tx.status, TxStatus::SignPending);

    // Sign request for a digest the permit never authorized.
    let err = h
        .orchestrator
        .begin_mpc_signing(tx.id, [0x66u8; 32], h.bob, "tamper")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::PermitInvalid(_)));

    let rejected_events: Vec<_> = h
        .store
        .permits_for_tx(tx.id)
        .await
        .unwrap();
    assert_eq!(rejected_events.len(), 1);
    assert!(!rejected_events[0].is_used);

    let permit_events = h
        .audit
        .events_for_entity("SIGNING_PERMIT", &rejected_events[0].id.to_string())
        .await
        .unwrap();
    let rejection = permit_events
        .iter()
        .find(|e| e.event_type == AuditEventType::SignPermitRejected)
        .expect("rejection must be audited");
    assert_eq!(
        rejection.payload.as_ref().unwrap()["reason"],
        "tx_hash mismatch"
    );

    assert_eq!(h.store_tx(tx.id).await.status, TxStatus::FailedSign);
}

/// Audit tampering: mutate one payload of a finalized run; verification
/// flags that exact event.
#[tokio::test]
async fn test_audit_tampering_is_detected() {
    let h = Harness::new().await;
    let wallet = h.local_wallet().await;
    let tx = h
        .submit(wallet.id, h.alice, &h.allowlisted.clone(), U256::from(MILLI_ETH), None)
        .await
        .unwrap();
    h.confirm_to_finality(tx.id).await;

    let clean = h.audit.verify_chain(None, None).await.unwrap();
    assert!(clean.is_valid);
    assert!(clean.total_events > 10);

    // Flip one payload field in the middle of the chain.
    let victim_seq = clean.total_events as u64 / 2;
    let mut victim = h
        .store
        .audit_by_sequence(victim_seq)
        .await
        .unwrap()
        .unwrap();
    victim.payload = Some(serde_json::json!({"forged": true}));
    assert!(h.store.overwrite_audit_event(victim_seq, victim.clone()).await);

    let report = h.audit.verify_chain(None, None).await.unwrap();
    assert!(!report.is_valid);
    assert!(report
        .errors
        .iter()
        .any(|f| f.sequence_number == victim_seq && f.event_id == victim.id));
}

/// Segregation of duties: the creator cannot vote on their own request.
#[tokio::test]
async fn test_creator_cannot_approve_own_request() {
    let h = Harness::new().await;
    let (wallet, _) = h.mpc_wallet().await;
    h.fund_wallet(wallet.id, U256::from(ONE_ETH)).await;

    let tx = h
        .submit(wallet.id, h.alice, &h.allowlisted.clone(), U256::from(5 * MILLI_ETH), None)
        .await
        .unwrap();
    assert_eq!(tx.status, TxStatus::ApprovalPending);

    let err = h
        .orchestrator
        .approve(tx.id, h.alice, ApprovalDecision::Approved, None, "sod")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    // No vote recorded, no state change.
    assert!(h.store.approvals_for(tx.id).await.unwrap().is_empty());
    assert_eq!(h.store_tx(tx.id).await.status, TxStatus::ApprovalPending);
}

/// A rejection vote is immediately terminal.
#[tokio::test]
async fn test_rejection_vote_terminates_request() {
    let h = Harness::new().await;
    let (wallet, _) = h.mpc_wallet().await;
    h.fund_wallet(wallet.id, U256::from(ONE_ETH)).await;

    let tx = h
        .submit(wallet.id, h.alice, &h.allowlisted.clone(), U256::from(5 * MILLI_ETH), None)
        .await
        .unwrap();
    let (tx, _) = h
        .orchestrator
        .approve(tx.id, h.bob, ApprovalDecision::Rejected, Some("looks off".into()), "reject")
        .await
        .unwrap();
    assert_eq!(tx.status, TxStatus::Rejected);
    assert!(h.store.permits_for_tx(tx.id).await.unwrap().is_empty());
}

/// Withdrawals beyond the credited ledger balance never enter the
/// pipeline.
#[tokio::test]
async fn test_mpc_withdrawal_exceeding_ledger_is_refused() {
    let h = Harness::new().await;
    let (wallet, _) = h.mpc_wallet().await;
    h.fund_wallet(wallet.id, U256::from(MILLI_ETH)).await;

    let err = h
        .submit(
            wallet.id,
            h.alice,
            &h.allowlisted.clone(),
            U256::from(2 * MILLI_ETH),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

/// A reverted receipt fails the request without automatic retry.
#[tokio::test]
async fn test_reverted_transaction_fails_terminally_for_auto_retry() {
    let h = Harness::new().await;
    let wallet = h.local_wallet().await;

    h.chain.revert_next_broadcast().await;
    let tx = h
        .submit(wallet.id, h.alice, &h.allowlisted.clone(), U256::from(MILLI_ETH), None)
        .await
        .unwrap();
    assert_eq!(tx.status, TxStatus::Confirming);

    let after = h
        .orchestrator
        .check_confirmation(tx.id, "revert-check")
        .await
        .unwrap();
    assert_eq!(after.status, TxStatus::FailedBroadcast);

    let trajectory = h.trajectory(tx.id).await;
    assert!(trajectory.contains(&("CONFIRMING".into(), "FAILED_BROADCAST".into())));
}

/// Resolving a KYT review case re-enters the pipeline at the approval
/// gate with the frozen policy result; a blocking resolution terminates.
#[tokio::test]
async fn test_kyt_review_resume_after_resolution() {
    // The allowlisted recipient is also on the local review list, so
    // every outbound screening of it yields REVIEW.
    let h = Harness::with_config(|config| {
        config.kyt_local_graylist = "0xbb00000000000000000000000000000000000001".to_string();
    })
    .await;
    let (wallet, _) = h.mpc_wallet().await;
    h.fund_wallet(wallet.id, U256::from(ONE_ETH)).await;

    let tx = h
        .submit(wallet.id, h.alice, &h.allowlisted.clone(), U256::from(5 * MILLI_ETH), None)
        .await
        .unwrap();
    assert_eq!(tx.status, TxStatus::KytReview);
    let case_id = tx.kyt_case_id.expect("review opens a case");

    // Unresolved case: resume refuses.
    let err = h.orchestrator.resolve_kyt(tx.id, "resume").await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    // Operator clears the counterparty; the pipeline resumes at the
    // approval gate using the stored policy result.
    h.orchestrator
        .screening()
        .resolve_case(case_id, true, h.admin, Some("vendor cleared"), "resume")
        .await
        .unwrap();
    let resumed = h.orchestrator.resolve_kyt(tx.id, "resume").await.unwrap();
    assert_eq!(resumed.status, TxStatus::ApprovalPending);

    // A second request, this time resolved as BLOCK: terminal.
    let tx2 = h
        .submit(wallet.id, h.alice, &h.allowlisted.clone(), U256::from(6 * MILLI_ETH), None)
        .await
        .unwrap();
    assert_eq!(tx2.status, TxStatus::KytReview);
    h.orchestrator
        .screening()
        .resolve_case(tx2.kyt_case_id.unwrap(), false, h.admin, Some("confirmed hit"), "resume")
        .await
        .unwrap();
    let blocked = h.orchestrator.resolve_kyt(tx2.id, "resume").await.unwrap();
    assert_eq!(blocked.status, TxStatus::KytBlocked);
}
