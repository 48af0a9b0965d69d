use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::{Notify, Semaphore};

use crate::config::ComparisonConfig;
use crate::workflows::comparison::capture::OfferCapture;
use crate::workflows::comparison::domain::{
    NegotiationSession, NegotiationState, OfferId, PriceOffer, PurchaseOrderId, Requisition,
    RequisitionId, RequisitionStatus, SessionId, User, UserId, Vendor, VendorId,
};
use crate::workflows::comparison::ranking::{ScoringProfile, ScoringTargets, ScoringWeights};
use crate::workflows::comparison::repository::{
    ComparisonDocument, DispatchError, IssueError, NotificationDispatcher, OutboundMessage,
    ProcurementStore, PurchaseOrderIssuer, PurchaseOrderRequest, RenderError, RenderedArtifact,
    ReportRenderer,
};
use crate::workflows::comparison::service::ComparisonService;
use crate::workflows::comparison::store::InMemoryProcurementStore;

pub(super) const REQUISITION: &str = "req-100";
pub(super) const OWNER: &str = "u-owner";
pub(super) const VENDORS: [&str; 3] = ["v-north", "v-east", "v-south"];

pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 2, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn requisition_id() -> RequisitionId {
    RequisitionId::from(REQUISITION)
}

pub(super) fn profile() -> ScoringProfile {
    ScoringProfile {
        weights: ScoringWeights::default(),
        targets: ScoringTargets {
            target_price: Decimal::new(40_000, 0),
            max_price: Decimal::new(60_000, 0),
            target_delivery_days: 14,
            max_delivery_days: 60,
            min_payment_days: 0,
            target_payment_days: 60,
        },
    }
}

/// Open requisition over the three fixture vendors, closing a day after `now()`.
pub(super) fn requisition() -> Requisition {
    Requisition {
        id: requisition_id(),
        title: "Field laptops".to_string(),
        quantity: 30,
        owner_id: Some(UserId::from(OWNER)),
        status: RequisitionStatus::NegotiationStarted,
        negotiation_closes_at: now() + Duration::days(1),
        invited_vendors: VENDORS.iter().map(|id| VendorId::from(*id)).collect(),
        scoring: profile(),
        awarded_price: None,
        awarded_at: None,
    }
}

pub(super) fn overdue_requisition() -> Requisition {
    Requisition {
        negotiation_closes_at: now() - Duration::hours(2),
        ..requisition()
    }
}

pub(super) fn owner() -> User {
    User {
        id: UserId::from(OWNER),
        name: "Dana Buyer".to_string(),
        email: Some("dana@example.com".to_string()),
    }
}

pub(super) fn vendor(id: &str) -> Vendor {
    Vendor {
        id: VendorId::from(id),
        name: format!("Vendor {id}"),
        email: Some(format!("{id}@vendors.example")),
        rating: 80.0,
        past_performance: 0.9,
        certified: true,
    }
}

pub(super) fn session(
    vendor: &str,
    state: NegotiationState,
    price: Option<i64>,
) -> NegotiationSession {
    NegotiationSession {
        id: SessionId::from(format!("ses-{vendor}").as_str()),
        requisition_id: requisition_id(),
        vendor_id: VendorId::from(vendor),
        state,
        rounds: 3,
        latest_offer: price.map(|price| PriceOffer {
            total_price: Decimal::new(price, 0),
            payment_terms: "Net 45".to_string(),
            delivery_date: NaiveDate::from_ymd_opt(2025, 10, 20),
        }),
        utility_score: price.map(|_| 0.72),
        summary: format!("{vendor} negotiated over 3 rounds"),
        started_at: now() - Duration::days(3),
        updated_at: now() - Duration::hours(1),
    }
}

pub(super) fn seeded_store(requisition: Requisition) -> Arc<InMemoryProcurementStore> {
    let store = Arc::new(InMemoryProcurementStore::new());
    store.put_user(owner()).expect("seed owner");
    for id in VENDORS {
        store.put_vendor(vendor(id)).expect("seed vendor");
    }
    store.put_requisition(requisition).expect("seed requisition");
    store
}

pub(super) struct Harness {
    pub(super) store: Arc<InMemoryProcurementStore>,
    pub(super) renderer: Arc<MemoryRenderer>,
    pub(super) dispatcher: Arc<MemoryDispatcher>,
    pub(super) issuer: Arc<MemoryIssuer>,
    pub(super) service: Arc<ComparisonService>,
}

pub(super) fn harness(requisition: Requisition) -> Harness {
    harness_with(
        seeded_store(requisition),
        Arc::new(MemoryRenderer::default()),
    )
}

pub(super) fn harness_with(
    store: Arc<InMemoryProcurementStore>,
    renderer: Arc<MemoryRenderer>,
) -> Harness {
    harness_with_issuer(store, renderer, Arc::new(MemoryIssuer::default()))
}

pub(super) fn harness_with_issuer(
    store: Arc<InMemoryProcurementStore>,
    renderer: Arc<MemoryRenderer>,
    issuer: Arc<MemoryIssuer>,
) -> Harness {
    let dispatcher = Arc::new(MemoryDispatcher::default());
    let config = ComparisonConfig {
        notification_concurrency: 2,
        ..ComparisonConfig::default()
    };
    let service = Arc::new(ComparisonService::new(
        store.clone(),
        renderer.clone(),
        dispatcher.clone(),
        issuer.clone(),
        &config,
    ));
    Harness {
        store,
        renderer,
        dispatcher,
        issuer,
        service,
    }
}

/// Capture an ACCEPTED session per vendor at the given prices.
pub(super) async fn accept_all(harness: &Harness, prices: &[i64]) {
    for (vendor, price) in VENDORS.iter().zip(prices) {
        harness
            .service
            .record_negotiation(session(vendor, NegotiationState::Accepted, Some(*price)), now())
            .await
            .expect("negotiation recorded");
    }
}

/// Capture ACCEPTED sessions straight into the store, without the completion trigger.
pub(super) async fn capture_all(harness: &Harness, prices: &[i64]) {
    let capture = OfferCapture::new(harness.store.clone());
    for (vendor, price) in VENDORS.iter().zip(prices) {
        capture
            .capture(session(vendor, NegotiationState::Accepted, Some(*price)), now())
            .await
            .expect("offer captured");
    }
}

pub(super) async fn offer_id_for(harness: &Harness, vendor: &str) -> OfferId {
    harness
        .store
        .offers_for(&requisition_id())
        .await
        .expect("offers readable")
        .into_iter()
        .find(|offer| offer.vendor_id.as_str() == vendor)
        .map(|offer| offer.id)
        .expect("offer captured for vendor")
}

#[derive(Default)]
pub(super) struct MemoryRenderer {
    documents: Mutex<Vec<ComparisonDocument>>,
    fail: AtomicBool,
    gate: Option<Arc<Notify>>,
    entered: Option<Arc<Notify>>,
}

impl MemoryRenderer {
    pub(super) fn failing() -> Self {
        let renderer = Self::default();
        renderer.fail.store(true, Ordering::SeqCst);
        renderer
    }

    /// Renderer that signals `entered` and then waits on `gate` before finishing.
    pub(super) fn gated(entered: Arc<Notify>, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            entered: Some(entered),
            ..Self::default()
        }
    }

    pub(super) fn documents(&self) -> Vec<ComparisonDocument> {
        self.documents.lock().expect("renderer mutex poisoned").clone()
    }
}

#[async_trait]
impl ReportRenderer for MemoryRenderer {
    async fn render(
        &self,
        document: &ComparisonDocument,
    ) -> Result<RenderedArtifact, RenderError> {
        if let Some(entered) = &self.entered {
            entered.notify_one();
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(RenderError::Backend("renderer offline".to_string()));
        }
        self.documents
            .lock()
            .expect("renderer mutex poisoned")
            .push(document.clone());
        Ok(RenderedArtifact {
            path: format!("memory://{}.html", document.report_id),
            content_type: "text/html".to_string(),
        })
    }

    async fn read_artifact(&self, path: &str) -> Result<Vec<u8>, RenderError> {
        Ok(format!("<html>{path}</html>").into_bytes())
    }
}

#[derive(Default)]
pub(super) struct MemoryDispatcher {
    sent: Mutex<Vec<OutboundMessage>>,
    failing: Mutex<HashSet<String>>,
    attempts: AtomicUsize,
}

impl MemoryDispatcher {
    pub(super) fn fail_for(&self, recipient: &str) {
        self.failing
            .lock()
            .expect("dispatcher mutex poisoned")
            .insert(recipient.to_string());
    }

    pub(super) fn recover(&self) {
        self.failing.lock().expect("dispatcher mutex poisoned").clear();
    }

    pub(super) fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().expect("dispatcher mutex poisoned").clone()
    }

    pub(super) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationDispatcher for MemoryDispatcher {
    async fn dispatch(&self, message: OutboundMessage) -> Result<(), DispatchError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .failing
            .lock()
            .expect("dispatcher mutex poisoned")
            .contains(&message.recipient)
        {
            return Err(DispatchError::Transport("smtp relay refused".to_string()));
        }
        self.sent
            .lock()
            .expect("dispatcher mutex poisoned")
            .push(message);
        Ok(())
    }
}

/// Issuer keyed on the selection: a repeated request gets the PO already issued for it.
#[derive(Default)]
pub(super) struct MemoryIssuer {
    issued: Mutex<Vec<PurchaseOrderRequest>>,
    calls: AtomicUsize,
    fail: AtomicBool,
    gate: Option<Arc<Semaphore>>,
    entered: Option<Arc<Notify>>,
}

impl MemoryIssuer {
    /// Issuer that signals `entered` on every call, then waits for a `gate` permit.
    pub(super) fn gated(entered: Arc<Notify>, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            entered: Some(entered),
            ..Self::default()
        }
    }

    pub(super) fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    /// Distinct purchase orders, one per selection.
    pub(super) fn issued(&self) -> Vec<PurchaseOrderRequest> {
        self.issued.lock().expect("issuer mutex poisoned").clone()
    }

    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PurchaseOrderIssuer for MemoryIssuer {
    async fn issue(&self, request: PurchaseOrderRequest) -> Result<PurchaseOrderId, IssueError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(entered) = &self.entered {
            entered.notify_one();
        }
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.expect("issuer gate open");
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(IssueError::Unavailable("erp timeout".to_string()));
        }
        let mut issued = self.issued.lock().expect("issuer mutex poisoned");
        let position = match issued
            .iter()
            .position(|known| known.selection_id == request.selection_id)
        {
            Some(position) => position,
            None => {
                issued.push(request);
                issued.len() - 1
            }
        };
        Ok(PurchaseOrderId(format!("po-{:04}", position + 1)))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
