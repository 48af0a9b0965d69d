use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use procurement::config::ComparisonConfig;
use procurement::error::AppError;
use procurement::workflows::comparison::{
    DispatchError, HtmlReportRenderer, InMemoryProcurementStore, IssueError, NegotiationSession,
    NegotiationState, NotificationDispatcher, OutboundMessage, PriceOffer, ProcurementStore,
    PurchaseOrderId, PurchaseOrderIssuer, PurchaseOrderRequest, Requisition, RequisitionId,
    RequisitionStatus, ScoringProfile, ScoringTargets, ScoringWeights, SelectionId, SessionId,
    SqliteProcurementStore, User, UserId, Vendor, VendorId,
};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Dispatcher that writes each message to the log instead of a mail relay.
#[derive(Default)]
pub(crate) struct LoggingDispatcher;

#[async_trait]
impl NotificationDispatcher for LoggingDispatcher {
    async fn dispatch(&self, message: OutboundMessage) -> Result<(), DispatchError> {
        info!(
            recipient = %message.recipient,
            template = %message.template,
            attachment = message.attachment.as_deref().unwrap_or("-"),
            "notification dispatched"
        );
        Ok(())
    }
}

/// Issues purchase orders locally. The number is derived from the selection, so a
/// repeated request and a restarted process both resolve to the same PO.
#[derive(Default)]
pub(crate) struct LocalIssuer;

impl LocalIssuer {
    fn number_for(selection: &SelectionId) -> PurchaseOrderId {
        let key = selection.as_str();
        let key = key.strip_prefix("sel-").unwrap_or(key);
        PurchaseOrderId(format!("PO-{}", key.to_ascii_uppercase()))
    }
}

#[async_trait]
impl PurchaseOrderIssuer for LocalIssuer {
    async fn issue(&self, request: PurchaseOrderRequest) -> Result<PurchaseOrderId, IssueError> {
        if request.total_price <= Decimal::ZERO {
            return Err(IssueError::Rejected(format!(
                "offer {} has no billable amount",
                request.offer_id
            )));
        }
        let id = Self::number_for(&request.selection_id);
        info!(
            purchase_order_id = %id,
            selection_id = %request.selection_id,
            requisition_id = %request.requisition_id,
            vendor_id = %request.vendor_id,
            total_price = %request.total_price,
            "purchase order issued"
        );
        Ok(id)
    }
}

pub(crate) fn renderer(config: &ComparisonConfig) -> Arc<HtmlReportRenderer> {
    Arc::new(HtmlReportRenderer::new(config.artifact_dir.clone()))
}

/// Open the configured store, seeding the demo requisition when asked.
pub(crate) fn open_store(
    database: Option<&Path>,
    seed: Option<&DemoFixture>,
) -> Result<Arc<dyn ProcurementStore>, AppError> {
    match database {
        Some(path) => {
            let store = SqliteProcurementStore::open(path)?;
            if let Some(fixture) = seed {
                for user in &fixture.users {
                    store.put_user(user)?;
                }
                for vendor in &fixture.vendors {
                    store.put_vendor(vendor)?;
                }
                store.put_requisition(&fixture.requisition)?;
            }
            info!(path = %path.display(), "using sqlite store");
            Ok(Arc::new(store))
        }
        None => {
            let store = InMemoryProcurementStore::new();
            if let Some(fixture) = seed {
                for user in &fixture.users {
                    store.put_user(user.clone())?;
                }
                for vendor in &fixture.vendors {
                    store.put_vendor(vendor.clone())?;
                }
                store.put_requisition(fixture.requisition.clone())?;
            }
            info!("using in-memory store");
            Ok(Arc::new(store))
        }
    }
}

/// A requisition for 25 rugged tablets with three invited vendors and their closing offers.
pub(crate) struct DemoFixture {
    pub(crate) users: Vec<User>,
    pub(crate) vendors: Vec<Vendor>,
    pub(crate) requisition: Requisition,
    pub(crate) sessions: Vec<NegotiationSession>,
}

impl DemoFixture {
    pub(crate) const REQUISITION: &'static str = "req-demo-tablets";

    pub(crate) fn build(now: DateTime<Utc>) -> Self {
        let vendors = vec![
            demo_vendor("v-ridgeline", "Ridgeline Devices", 88.0, 0.93, true),
            demo_vendor("v-harbor", "Harbor Supply Co", 72.0, 0.81, true),
            demo_vendor("v-kestrel", "Kestrel Wholesale", 64.0, 0.7, false),
        ];
        let requisition = Requisition {
            id: RequisitionId::from(Self::REQUISITION),
            title: "Rugged field tablets".to_string(),
            quantity: 25,
            owner_id: Some(UserId::from("u-procurement-lead")),
            status: RequisitionStatus::NegotiationStarted,
            negotiation_closes_at: now + Duration::days(2),
            invited_vendors: vendors.iter().map(|vendor| vendor.id.clone()).collect(),
            scoring: ScoringProfile {
                weights: ScoringWeights::default(),
                targets: ScoringTargets {
                    target_price: Decimal::new(30_000, 0),
                    max_price: Decimal::new(45_000, 0),
                    target_delivery_days: 10,
                    max_delivery_days: 45,
                    min_payment_days: 0,
                    target_payment_days: 60,
                },
            },
            awarded_price: None,
            awarded_at: None,
        };

        let today = now.date_naive();
        let sessions = vec![
            demo_session(
                "v-ridgeline",
                Decimal::new(36_250, 0),
                "Net 45",
                today + Duration::days(12),
                0.78,
                now,
            ),
            demo_session(
                "v-harbor",
                Decimal::new(33_900, 0),
                "Net 30",
                today + Duration::days(21),
                0.71,
                now,
            ),
            demo_session(
                "v-kestrel",
                Decimal::new(39_400, 0),
                "Net 60",
                today + Duration::days(9),
                0.66,
                now,
            ),
        ];

        Self {
            users: vec![User {
                id: UserId::from("u-procurement-lead"),
                name: "Morgan Ellis".to_string(),
                email: Some("morgan.ellis@buyer.example".to_string()),
            }],
            vendors,
            requisition,
            sessions,
        }
    }
}

fn demo_vendor(id: &str, name: &str, rating: f64, past_performance: f64, certified: bool) -> Vendor {
    Vendor {
        id: VendorId::from(id),
        name: name.to_string(),
        email: Some(format!("bids@{}.example", id.trim_start_matches("v-"))),
        rating,
        past_performance,
        certified,
    }
}

fn demo_session(
    vendor: &str,
    total_price: Decimal,
    payment_terms: &str,
    delivery_date: NaiveDate,
    utility: f64,
    now: DateTime<Utc>,
) -> NegotiationSession {
    NegotiationSession {
        id: SessionId::from(format!("ses-demo-{vendor}").as_str()),
        requisition_id: RequisitionId::from(DemoFixture::REQUISITION),
        vendor_id: VendorId::from(vendor),
        state: NegotiationState::Accepted,
        rounds: 3,
        latest_offer: Some(PriceOffer {
            total_price,
            payment_terms: payment_terms.to_string(),
            delivery_date: Some(delivery_date),
        }),
        utility_score: Some(utility),
        summary: format!("{vendor} accepted {payment_terms} after 3 rounds"),
        started_at: now - Duration::days(1),
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_request(selection: &str, total: i64) -> PurchaseOrderRequest {
        PurchaseOrderRequest {
            selection_id: SelectionId::from(selection),
            requisition_id: RequisitionId::from("req-1"),
            vendor_id: VendorId::from("v-1"),
            offer_id: "off-1".into(),
            total_price: Decimal::new(total, 0),
            unit_price: Decimal::new(100, 0),
            payment_terms: "Net 30".to_string(),
            delivery_date: None,
        }
    }

    #[tokio::test]
    async fn local_issuer_keys_orders_on_the_selection() {
        let first = LocalIssuer
            .issue(order_request("sel-4f2a", 1_000))
            .await
            .expect("order issued");
        let repeated = LocalIssuer
            .issue(order_request("sel-4f2a", 1_000))
            .await
            .expect("repeat resolves");
        let other = LocalIssuer
            .issue(order_request("sel-9c01", 1_000))
            .await
            .expect("second selection");

        assert_eq!(first.as_str(), "PO-4F2A");
        assert_eq!(repeated, first);
        assert_ne!(other, first);

        let rejected = LocalIssuer.issue(order_request("sel-4f2a", 0)).await;
        assert!(matches!(rejected, Err(IssueError::Rejected(_))));
    }

    #[tokio::test]
    async fn seeded_memory_store_holds_the_demo_requisition() {
        let fixture = DemoFixture::build(Utc::now());
        let store = open_store(None, Some(&fixture)).expect("store opens");

        let requisition = store
            .requisition(&RequisitionId::from(DemoFixture::REQUISITION))
            .await
            .expect("requisition readable")
            .expect("requisition seeded");
        assert_eq!(requisition.invited_vendors.len(), 3);
        assert_eq!(fixture.sessions.len(), 3);
    }
}
