use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use procurement::config::ComparisonConfig;
use procurement::workflows::comparison::{
    ComparisonService, DeliveryStatus, DispatchError, HtmlReportRenderer,
    InMemoryProcurementStore, IssueError, NegotiationSession, NegotiationState,
    NotificationDispatcher, OfferStatus, OutboundMessage, PriceOffer, PurchaseOrderId,
    PurchaseOrderIssuer, PurchaseOrderRequest, RankingSource, Requisition, RequisitionId,
    RequisitionStatus, ScoringProfile, ScoringTargets, ScoringWeights, SelectionChannel,
    SelectionRequest, SessionId, TriggerReason, User, UserId, Vendor, VendorId,
};
use rust_decimal::Decimal;

#[derive(Default)]
struct Outbox {
    messages: Mutex<Vec<OutboundMessage>>,
}

impl Outbox {
    fn templates(&self) -> Vec<String> {
        self.messages
            .lock()
            .expect("outbox mutex poisoned")
            .iter()
            .map(|message| message.template.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationDispatcher for Outbox {
    async fn dispatch(&self, message: OutboundMessage) -> Result<(), DispatchError> {
        self.messages
            .lock()
            .expect("outbox mutex poisoned")
            .push(message);
        Ok(())
    }
}

#[derive(Default)]
struct Ledger {
    orders: Mutex<Vec<PurchaseOrderRequest>>,
}

#[async_trait]
impl PurchaseOrderIssuer for Ledger {
    async fn issue(&self, request: PurchaseOrderRequest) -> Result<PurchaseOrderId, IssueError> {
        let mut orders = self.orders.lock().expect("ledger mutex poisoned");
        orders.push(request);
        Ok(PurchaseOrderId(format!("PO-{}", 7000 + orders.len())))
    }
}

fn opened_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 3, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn requisition() -> Requisition {
    Requisition {
        id: RequisitionId::from("req-2025-0042"),
        title: "Warehouse shelving".to_string(),
        quantity: 40,
        owner_id: Some(UserId::from("u-buyer")),
        status: RequisitionStatus::NegotiationStarted,
        negotiation_closes_at: opened_at() + Duration::days(5),
        invited_vendors: ["v-alpha", "v-beta", "v-gamma"]
            .into_iter()
            .map(VendorId::from)
            .collect(),
        scoring: ScoringProfile {
            weights: ScoringWeights::default(),
            targets: ScoringTargets {
                target_price: Decimal::new(40_000, 0),
                max_price: Decimal::new(60_000, 0),
                target_delivery_days: 14,
                max_delivery_days: 60,
                min_payment_days: 0,
                target_payment_days: 60,
            },
        },
        awarded_price: None,
        awarded_at: None,
    }
}

fn accepted(vendor: &str, price: i64, at: DateTime<Utc>) -> NegotiationSession {
    NegotiationSession {
        id: SessionId::from(format!("ses-{vendor}").as_str()),
        requisition_id: RequisitionId::from("req-2025-0042"),
        vendor_id: VendorId::from(vendor),
        state: NegotiationState::Accepted,
        rounds: 4,
        latest_offer: Some(PriceOffer {
            total_price: Decimal::new(price, 0),
            payment_terms: "Net 30".to_string(),
            delivery_date: NaiveDate::from_ymd_opt(2025, 11, 24),
        }),
        utility_score: Some(0.8),
        summary: format!("{vendor} accepted after 4 rounds"),
        started_at: opened_at(),
        updated_at: at,
    }
}

#[tokio::test]
async fn negotiations_flow_through_report_and_award() {
    let artifacts = tempfile::tempdir().expect("artifact dir");
    let store = Arc::new(InMemoryProcurementStore::new());
    store
        .put_user(User {
            id: UserId::from("u-buyer"),
            name: "Riley Chen".to_string(),
            email: Some("riley@buyer.example".to_string()),
        })
        .expect("seed buyer");
    for id in ["v-alpha", "v-beta", "v-gamma"] {
        store
            .put_vendor(Vendor {
                id: VendorId::from(id),
                name: format!("{id} supplies"),
                email: Some(format!("sales@{id}.example")),
                rating: 75.0,
                past_performance: 0.85,
                certified: true,
            })
            .expect("seed vendor");
    }
    store.put_requisition(requisition()).expect("seed requisition");

    let outbox = Arc::new(Outbox::default());
    let ledger = Arc::new(Ledger::default());
    let service = ComparisonService::new(
        store,
        Arc::new(HtmlReportRenderer::new(artifacts.path())),
        outbox.clone(),
        ledger.clone(),
        &ComparisonConfig::default(),
    );

    let mut at = opened_at();
    for (vendor, price) in [("v-alpha", 48_000), ("v-beta", 45_000), ("v-gamma", 52_000)] {
        at += Duration::hours(6);
        service
            .record_negotiation(accepted(vendor, price, at), at)
            .await
            .expect("negotiation recorded");
    }

    let requisition_id = RequisitionId::from("req-2025-0042");
    let status = service
        .status(&requisition_id, at)
        .await
        .expect("status available");
    assert!(status.completion.all_completed);
    let report = status.report.expect("report generated on completion");
    assert_eq!(report.trigger, TriggerReason::AllCompleted);
    assert_eq!(report.email_status, DeliveryStatus::Sent);

    let top = service
        .top(&requisition_id, 3)
        .await
        .expect("ranking available");
    assert_eq!(top.source, RankingSource::Report);
    let labels: Vec<String> = top.offers.iter().map(|offer| offer.label()).collect();
    assert_eq!(labels, ["L1", "L2", "L3"]);
    assert_eq!(top.offers[0].vendor_id.as_str(), "v-beta");

    let artifact = service
        .report_artifact(&requisition_id)
        .await
        .expect("artifact readable");
    assert_eq!(artifact.content_type, "text/html");
    let html = String::from_utf8(artifact.bytes).expect("utf-8 report");
    assert!(html.contains("Warehouse shelving"));
    assert!(html.contains("v-beta supplies"));

    let outcome = service
        .select(
            SelectionRequest {
                requisition_id: requisition_id.clone(),
                offer_id: top.offers[0].offer_id.clone(),
                acting_user: UserId::from("u-buyer"),
                channel: SelectionChannel::EmailLink,
                reason: Some("L1 within budget".to_string()),
            },
            at + Duration::hours(1),
        )
        .await
        .expect("award succeeds");
    assert_eq!(outcome.purchase_order_id, Some(PurchaseOrderId::from("PO-7001")));
    assert_eq!(outcome.notifications_sent, 3);

    let bids = service.bids(&requisition_id).await.expect("bids listed");
    let selected: Vec<_> = bids
        .bids
        .iter()
        .filter(|bid| bid.status == OfferStatus::Selected)
        .collect();
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].vendor_name, "v-beta supplies");

    let templates = outbox.templates();
    assert_eq!(templates[0], "comparison_report_ready");
    assert_eq!(
        templates.iter().filter(|t| *t == "selection_won").count(),
        1
    );
    assert_eq!(
        templates.iter().filter(|t| *t == "selection_lost").count(),
        2
    );
    assert_eq!(
        ledger.orders.lock().expect("ledger mutex poisoned")[0].total_price,
        Decimal::new(45_000, 0)
    );
}
