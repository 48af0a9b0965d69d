use super::common::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::workflows::comparison::domain::{
    DeliveryStatus, NegotiationState, TriggerReason, User, UserId,
};
use crate::workflows::comparison::report::ReportError;
use crate::workflows::comparison::repository::ProcurementStore;
use crate::workflows::comparison::service::{ComparisonError, RankingSource};

#[tokio::test]
async fn manual_generate_ranks_by_price_and_emails_the_owner() {
    let harness = harness(requisition());
    capture_all(&harness, &[48_000, 45_000, 52_000]).await;

    let view = harness
        .service
        .generate(&requisition_id(), now())
        .await
        .expect("report generated");

    assert!(view.generated);
    let report = view.report;
    assert_eq!(report.trigger, TriggerReason::Manual);
    assert_eq!(report.completed_vendors, 3);
    assert_eq!(report.email_status, DeliveryStatus::Sent);
    let prices: Vec<Decimal> = report
        .top_offers
        .iter()
        .map(|offer| offer.total_price)
        .collect();
    assert_eq!(
        prices,
        vec![
            Decimal::new(45_000, 0),
            Decimal::new(48_000, 0),
            Decimal::new(52_000, 0)
        ]
    );
    assert_eq!(report.top_offers[0].vendor_id.as_str(), VENDORS[1]);

    let sent = harness.dispatcher.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].template, "comparison_report_ready");
    assert_eq!(sent[0].attachment.as_deref(), Some(report.artifact_path.as_str()));
    assert_eq!(
        sent[0].payload.get("l1_price").map(String::as_str),
        Some("45000")
    );
}

#[tokio::test]
async fn second_generate_is_a_silent_no_op() {
    let harness = harness(requisition());
    capture_all(&harness, &[45_000, 48_000, 52_000]).await;

    let first = harness
        .service
        .generate(&requisition_id(), now())
        .await
        .expect("first generate");
    let second = harness
        .service
        .generate(&requisition_id(), now())
        .await
        .expect("second generate");

    assert!(first.generated);
    assert!(!second.generated);
    assert_eq!(first.report.id, second.report.id);
    assert_eq!(harness.renderer.documents().len(), 1);
    assert_eq!(harness.dispatcher.attempts(), 1);
}

#[tokio::test]
async fn renderer_failure_leaves_no_report_behind() {
    let harness = harness_with(
        seeded_store(requisition()),
        Arc::new(MemoryRenderer::failing()),
    );
    capture_all(&harness, &[45_000, 48_000, 52_000]).await;

    let result = harness.service.generate(&requisition_id(), now()).await;

    assert!(matches!(
        result,
        Err(ComparisonError::Report(ReportError::Render(_)))
    ));
    assert!(harness
        .store
        .report_for(&requisition_id())
        .await
        .expect("report readable")
        .is_none());
    assert_eq!(harness.dispatcher.attempts(), 0);
}

#[tokio::test]
async fn email_failure_keeps_the_report_and_resend_recovers() {
    let harness = harness(requisition());
    harness.dispatcher.fail_for("dana@example.com");
    capture_all(&harness, &[45_000, 48_000, 52_000]).await;

    let view = harness
        .service
        .generate(&requisition_id(), now())
        .await
        .expect("report still generated");
    assert_eq!(view.report.email_status, DeliveryStatus::Failed);
    let stored = harness
        .store
        .report_for(&requisition_id())
        .await
        .expect("report readable")
        .expect("report stored");
    assert_eq!(stored.email_status, DeliveryStatus::Failed);

    harness.dispatcher.recover();
    let resent = harness
        .service
        .resend_report_email(&requisition_id())
        .await
        .expect("resend");
    assert_eq!(resent.id, stored.id);
    assert_eq!(resent.email_status, DeliveryStatus::Sent);
}

#[tokio::test]
async fn generate_requires_completed_offers_and_an_owner_email() {
    let harness = harness(requisition());
    harness
        .service
        .record_negotiation(
            session(VENDORS[0], NegotiationState::Negotiating, Some(45_000)),
            now(),
        )
        .await
        .expect("pending offer recorded");

    let empty = harness.service.generate(&requisition_id(), now()).await;
    assert!(matches!(
        empty,
        Err(ComparisonError::Report(ReportError::NoCompletedOffers))
    ));

    harness
        .store
        .put_user(User {
            id: UserId::from(OWNER),
            name: "Dana Buyer".to_string(),
            email: Some("   ".to_string()),
        })
        .expect("blank email");
    let no_email = harness.service.generate(&requisition_id(), now()).await;
    assert!(matches!(
        no_email,
        Err(ComparisonError::Report(ReportError::MissingOwnerEmail))
    ));
}

#[tokio::test]
async fn top_switches_from_live_ranking_to_the_stored_snapshot() {
    let harness = harness(requisition());
    capture_all(&harness, &[45_000, 48_000, 52_000]).await;

    let live = harness
        .service
        .top(&requisition_id(), 2)
        .await
        .expect("live ranking");
    assert_eq!(live.source, RankingSource::Live);
    assert_eq!(live.offers.len(), 2);

    harness
        .service
        .generate(&requisition_id(), now())
        .await
        .expect("report generated");
    let stored = harness
        .service
        .top(&requisition_id(), 3)
        .await
        .expect("stored ranking");
    assert_eq!(stored.source, RankingSource::Report);
    assert_eq!(stored.offers.len(), 3);
    assert_eq!(stored.offers[0].label(), "L1");
}

#[tokio::test]
async fn concurrent_generates_produce_exactly_one_report() {
    let harness = harness(requisition());
    capture_all(&harness, &[45_000, 48_000, 52_000]).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = harness.service.clone();
        handles.push(tokio::spawn(async move {
            service.generate(&requisition_id(), now()).await
        }));
    }

    let mut generated = 0;
    let mut report_ids = Vec::new();
    for handle in handles {
        let view = handle
            .await
            .expect("task joined")
            .expect("generate succeeds for every caller");
        if view.generated {
            generated += 1;
        }
        report_ids.push(view.report.id);
    }

    assert_eq!(generated, 1);
    report_ids.dedup();
    assert_eq!(report_ids.len(), 1);
    assert_eq!(harness.dispatcher.sent().len(), 1);
}

#[tokio::test]
async fn manual_generate_racing_a_deadline_tick_keeps_one_report() {
    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let harness = harness_with(
        seeded_store(overdue_requisition()),
        Arc::new(MemoryRenderer::gated(entered.clone(), gate.clone())),
    );
    capture_all(&harness, &[45_000, 48_000, 52_000]).await;

    let service = harness.service.clone();
    let manual = tokio::spawn(async move { service.generate(&requisition_id(), now()).await });
    entered.notified().await;

    // The manual render is parked, so the tick also finds no report and renders.
    let service = harness.service.clone();
    let tick = tokio::spawn(async move { service.check_deadlines(now()).await });
    entered.notified().await;
    assert_eq!(harness.renderer.documents().len(), 0);

    gate.notify_waiters();
    let manual = manual
        .await
        .expect("manual task joined")
        .expect("manual generate succeeds even when it loses");
    let tick = tick.await.expect("tick joined");

    assert_eq!(tick.scanned, 1);
    assert_eq!(tick.failed, 0);
    assert_eq!(tick.generated + tick.skipped_existing, 1);
    assert_eq!(
        usize::from(manual.generated) + tick.generated,
        1,
        "exactly one trigger commits the report"
    );

    let stored = harness
        .store
        .report_for(&requisition_id())
        .await
        .expect("report readable")
        .expect("one report stored");
    assert_eq!(manual.report.id, stored.id);
    let expected_trigger = if manual.generated {
        TriggerReason::Manual
    } else {
        TriggerReason::DeadlineReached
    };
    assert_eq!(stored.trigger, expected_trigger);
    assert_eq!(harness.renderer.documents().len(), 2);
    assert_eq!(harness.dispatcher.sent().len(), 1);
}

#[tokio::test]
async fn report_artifact_is_served_with_its_content_type() {
    let harness = harness(requisition());

    let missing = harness.service.report_artifact(&requisition_id()).await;
    assert!(matches!(
        missing,
        Err(ComparisonError::Report(ReportError::ReportNotFound))
    ));

    capture_all(&harness, &[45_000, 48_000, 52_000]).await;
    let view = harness
        .service
        .generate(&requisition_id(), now())
        .await
        .expect("report generated");

    let artifact = harness
        .service
        .report_artifact(&requisition_id())
        .await
        .expect("artifact readable");
    assert_eq!(artifact.report_id, view.report.id);
    assert_eq!(artifact.content_type, "text/html");
    assert!(!artifact.bytes.is_empty());
}
