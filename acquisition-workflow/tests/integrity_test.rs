//! Tamper detection and case flagging integration tests

mod common;

use serde_json::json;
use tokio_test::assert_err;

use acquisition_workflow::{NoticePayload, WorkflowError};
use land_ledger::{ChainFailure, LedgerStore};

use common::*;

#[tokio::test]
async fn test_untouched_chain_verifies() {
    let h = harness();
    to_pending_payment(&h.engine, "SY-1").await;

    let report = h.engine.verify_case("SY-1").await.unwrap();
    assert!(report.valid);
    assert_eq!(report.blocks_checked, 5);
    assert!(h.engine.flagged_cases().is_empty());
}

#[tokio::test]
async fn test_any_tampered_block_is_identified() {
    for height in 0..5u64 {
        let h = harness();
        to_pending_payment(&h.engine, "SY-1").await;
        let target = h.ledger.blocks_for("SY-1").await.unwrap().as_slice()[height as usize]
            .block_id
            .clone();

        h.ledger
            .tamper("SY-1", height, |b| {
                b.metadata.insert("amount".to_string(), json!(1));
            })
            .await;

        let report = h.engine.verify_case("SY-1").await.unwrap();
        assert!(!report.valid, "height {} not detected", height);
        assert_eq!(report.broken_block_id(), Some(target.as_str()));
        assert!(matches!(report.failure, Some(ChainFailure::HashMismatch { .. })));
    }
}

#[tokio::test]
async fn test_tampered_case_refuses_writes() {
    let h = harness();
    h.engine.record_measurement("SY-A", measurement(1.0), OFFICER).await.unwrap();
    h.engine.declare_award("SY-A", award(), OFFICER).await.unwrap();
    h.engine.record_measurement("SY-B", measurement(1.0), OFFICER).await.unwrap();

    let award_block = h.ledger.latest_block_for("SY-A").await.unwrap().unwrap();
    h.ledger
        .tamper("SY-A", 1, |b| {
            b.metadata.insert("total_amount".to_string(), json!(9_000_000));
        })
        .await;

    // The write itself detects the break
    let err = assert_err!(h.engine.generate_notice("SY-A", NoticePayload::default(), OFFICER).await);
    assert_eq!(
        err,
        WorkflowError::HashChainBroken {
            case_id: "SY-A".to_string(),
            block_id: Some(award_block.block_id.clone()),
        }
    );
    assert_eq!(err.code(), "HASH_CHAIN_BROKEN");

    let flags = h.engine.flagged_cases();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].case_id, "SY-A");

    // Every later write is refused too
    let err = assert_err!(h.engine.retract_stage("SY-A", acquisition_workflow::Stage::Award, "fix", OFFICER).await);
    assert!(matches!(err, WorkflowError::HashChainBroken { .. }));

    // Other cases are unaffected
    h.engine.declare_award("SY-B", award(), OFFICER).await.unwrap();
    assert!(h.engine.verify_case("SY-B").await.unwrap().valid);
    assert_eq!(h.ledger.count().await, 4);
}

#[tokio::test]
async fn test_status_annotates_blocks_and_reports_flag() {
    let h = harness();
    to_pending_payment(&h.engine, "SY-1").await;
    h.ledger
        .tamper("SY-1", 2, |b| b.remarks.push_str(" (edited)"))
        .await;

    let status = h.engine.get_case_status("SY-1").await.unwrap();
    assert!(!status.verification.valid);
    assert!(status.is_flagged());

    let verdicts: Vec<_> = status.blocks.iter().map(|b| b.is_valid).collect();
    assert_eq!(verdicts, vec![Some(true), Some(true), Some(false), None, None]);

    assert_eq!(h.engine.get_case_status("SY-1").await.unwrap(), status);
}

#[tokio::test]
async fn test_flag_clears_only_when_chain_is_restored() {
    let h = harness();
    h.engine.record_measurement("SY-1", measurement(1.0), OFFICER).await.unwrap();

    let original = h.ledger.latest_block_for("SY-1").await.unwrap().unwrap();
    h.ledger
        .tamper("SY-1", 0, |b| b.officer_id = "intruder".to_string())
        .await;
    assert!(!h.engine.verify_case("SY-1").await.unwrap().valid);

    let err = assert_err!(h.engine.clear_flag("SY-1", "auditor-1").await);
    assert!(matches!(err, WorkflowError::HashChainBroken { .. }));
    assert_eq!(h.engine.flagged_cases().len(), 1);

    // Restore from backup, then an operator lifts the flag
    h.ledger
        .tamper("SY-1", 0, |b| b.officer_id = original.officer_id.clone())
        .await;
    let report = h.engine.clear_flag("SY-1", "auditor-1").await.unwrap();
    assert!(report.valid);
    assert!(h.engine.flagged_cases().is_empty());

    h.engine.declare_award("SY-1", award(), OFFICER).await.unwrap();
}

#[tokio::test]
async fn test_deleted_block_breaks_the_link() {
    let h = harness();
    to_pending_payment(&h.engine, "SY-1").await;
    h.ledger.tamper_remove("SY-1", 1).await.unwrap();

    let report = h.engine.verify_case("SY-1").await.unwrap();
    assert!(!report.valid);
    assert!(matches!(report.failure, Some(ChainFailure::LinkMismatch { .. })));
    assert_eq!(report.first_broken_block.unwrap().height, 2);
}
