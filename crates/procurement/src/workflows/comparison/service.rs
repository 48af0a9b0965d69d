use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use super::capture::{CaptureOutcome, OfferCapture};
use super::domain::{
    ComparisonReport, DeliveryStatus, NegotiationSession, Notification, Offer, OfferId,
    OfferStatus, PurchaseOrderId, RankedOffer, ReportId, Requisition, RequisitionId,
    RequisitionStatus, Selection, SelectionId, TriggerReason, VendorId,
};
use super::ranking::RankingEngine;
use super::report::{ReportError, ReportGenerator, ReportOutcome};
use super::repository::{
    NotificationDispatcher, ProcurementStore, PurchaseOrderIssuer, ReportRenderer,
    RepositoryError,
};
use super::scheduler::{DeadlineScheduler, TickSummary};
use super::selection::{
    NotificationRetry, SelectionError, SelectionOutcome, SelectionRequest, SelectionService,
};
use super::tracker::{current_offers, CompletionStatus, CompletionTracker};
use crate::config::ComparisonConfig;

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub report_id: ReportId,
    pub trigger: TriggerReason,
    pub email_status: DeliveryStatus,
    pub generated_at: DateTime<Utc>,
}

impl From<&ComparisonReport> for ReportSummary {
    fn from(report: &ComparisonReport) -> Self {
        Self {
            report_id: report.id.clone(),
            trigger: report.trigger,
            email_status: report.email_status,
            generated_at: report.generated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectionSummary {
    pub selection_id: SelectionId,
    pub offer_id: OfferId,
    pub vendor_id: VendorId,
    pub purchase_order_id: Option<PurchaseOrderId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonStatusView {
    pub requisition_status: RequisitionStatus,
    #[serde(flatten)]
    pub completion: CompletionStatus,
    pub report: Option<ReportSummary>,
    pub selection: Option<SelectionSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BidView {
    pub offer_id: OfferId,
    pub vendor_id: VendorId,
    pub vendor_name: String,
    pub total_price: Decimal,
    pub unit_price: Decimal,
    pub payment_terms: String,
    pub delivery_date: Option<NaiveDate>,
    pub utility_score: Option<f64>,
    pub status: OfferStatus,
    pub summary: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BidsView {
    pub requisition_id: RequisitionId,
    pub bids: Vec<BidView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingSource {
    /// Rows frozen on the stored comparison report.
    Report,
    /// Computed from the current offers.
    Live,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopOffersView {
    pub requisition_id: RequisitionId,
    pub source: RankingSource,
    pub offers: Vec<RankedOffer>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateView {
    pub generated: bool,
    pub report: ComparisonReport,
}

#[derive(Debug, Clone)]
pub struct ReportArtifact {
    pub report_id: ReportId,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectionAudit {
    pub selection: Selection,
    pub approver_name: Option<String>,
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NegotiationRecorded {
    pub capture: &'static str,
    pub offer: Option<Offer>,
    pub trigger: Option<TriggerReason>,
    pub report_id: Option<ReportId>,
}

/// Error raised by the comparison facade.
#[derive(Debug, thiserror::Error)]
pub enum ComparisonError {
    #[error("requisition not found")]
    RequisitionNotFound,
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Facade composing capture, tracking, ranking, reporting, selection and the scheduler
/// over one store.
pub struct ComparisonService {
    store: Arc<dyn ProcurementStore>,
    capture: OfferCapture,
    reports: Arc<ReportGenerator>,
    selections: SelectionService,
    scheduler: Arc<DeadlineScheduler>,
}

impl ComparisonService {
    pub fn new(
        store: Arc<dyn ProcurementStore>,
        renderer: Arc<dyn ReportRenderer>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        issuer: Arc<dyn PurchaseOrderIssuer>,
        config: &ComparisonConfig,
    ) -> Self {
        let reports = Arc::new(ReportGenerator::new(
            Arc::clone(&store),
            renderer,
            Arc::clone(&dispatcher),
            config.top_n,
        ));
        let selections = SelectionService::new(
            Arc::clone(&store),
            issuer,
            dispatcher,
            config.notification_concurrency,
        );
        let scheduler = Arc::new(DeadlineScheduler::new(
            Arc::clone(&store),
            Arc::clone(&reports),
            non_zero(config.scheduler_interval),
        ));

        Self {
            capture: OfferCapture::new(Arc::clone(&store)),
            store,
            reports,
            selections,
            scheduler,
        }
    }

    pub fn store(&self) -> Arc<dyn ProcurementStore> {
        Arc::clone(&self.store)
    }

    pub fn scheduler(&self) -> Arc<DeadlineScheduler> {
        Arc::clone(&self.scheduler)
    }

    pub async fn status(
        &self,
        requisition_id: &RequisitionId,
        now: DateTime<Utc>,
    ) -> Result<ComparisonStatusView, ComparisonError> {
        let (requisition, completion) =
            CompletionTracker::evaluate(self.store.as_ref(), requisition_id, now)
                .await
                .map_err(not_found_as_requisition)?;
        let report = self.store.report_for(requisition_id).await?;
        let selection = self.store.selection_for(requisition_id).await?;

        Ok(ComparisonStatusView {
            requisition_status: requisition.status,
            completion,
            report: report.as_ref().map(ReportSummary::from),
            selection: selection.map(|selection| SelectionSummary {
                selection_id: selection.id,
                offer_id: selection.offer_id,
                vendor_id: selection.vendor_id,
                purchase_order_id: selection.purchase_order_id,
            }),
        })
    }

    pub async fn bids(&self, requisition_id: &RequisitionId) -> Result<BidsView, ComparisonError> {
        self.require_requisition(requisition_id).await?;
        let offers = self.store.offers_for(requisition_id).await?;
        let vendor_ids: Vec<VendorId> = offers.iter().map(|offer| offer.vendor_id.clone()).collect();
        let vendors = self.store.vendors(&vendor_ids).await?;

        let bids = offers
            .into_iter()
            .map(|offer| {
                let vendor_name = vendors
                    .iter()
                    .find(|vendor| vendor.id == offer.vendor_id)
                    .map(|vendor| vendor.name.clone())
                    .unwrap_or_else(|| offer.vendor_id.0.clone());
                BidView {
                    offer_id: offer.id,
                    vendor_id: offer.vendor_id,
                    vendor_name,
                    total_price: offer.total_price,
                    unit_price: offer.unit_price,
                    payment_terms: offer.payment_terms,
                    delivery_date: offer.delivery_date,
                    utility_score: offer.utility_score,
                    status: offer.status,
                    summary: offer.summary,
                    updated_at: offer.updated_at,
                }
            })
            .collect();

        Ok(BidsView {
            requisition_id: requisition_id.clone(),
            bids,
        })
    }

    /// Stored snapshot when a report exists, otherwise a live ranking.
    pub async fn top(
        &self,
        requisition_id: &RequisitionId,
        n: usize,
    ) -> Result<TopOffersView, ComparisonError> {
        let requisition = self.require_requisition(requisition_id).await?;

        if let Some(report) = self.store.report_for(requisition_id).await? {
            let mut offers = report.top_offers;
            offers.truncate(n);
            return Ok(TopOffersView {
                requisition_id: requisition_id.clone(),
                source: RankingSource::Report,
                offers,
            });
        }

        let sessions = self.store.sessions_for(requisition_id).await?;
        let offers = current_offers(self.store.offers_for(requisition_id).await?, &sessions);
        let vendor_ids: Vec<VendorId> = offers.iter().map(|offer| offer.vendor_id.clone()).collect();
        let vendors = self.store.vendors(&vendor_ids).await?;
        let engine = RankingEngine::new(
            requisition.scoring,
            requisition.negotiation_closes_at.date_naive(),
        );

        Ok(TopOffersView {
            requisition_id: requisition_id.clone(),
            source: RankingSource::Live,
            offers: engine.top(&offers, &vendors, n),
        })
    }

    pub fn default_top_n(&self) -> usize {
        self.reports.top_n()
    }

    pub async fn report_artifact(
        &self,
        requisition_id: &RequisitionId,
    ) -> Result<ReportArtifact, ComparisonError> {
        let (report, bytes) = self.reports.artifact(requisition_id).await?;
        let content_type = mime_guess::from_path(&report.artifact_path)
            .first_or_octet_stream()
            .to_string();
        Ok(ReportArtifact {
            report_id: report.id,
            content_type,
            bytes,
        })
    }

    /// Manual "generate now". An existing report is returned with `generated = false`.
    pub async fn generate(
        &self,
        requisition_id: &RequisitionId,
        now: DateTime<Utc>,
    ) -> Result<GenerateView, ComparisonError> {
        let outcome = self
            .reports
            .generate(requisition_id, TriggerReason::Manual, now)
            .await?;
        Ok(GenerateView {
            generated: outcome.was_generated(),
            report: outcome.into_report(),
        })
    }

    pub async fn resend_report_email(
        &self,
        requisition_id: &RequisitionId,
    ) -> Result<ComparisonReport, ComparisonError> {
        Ok(self.reports.resend_email(requisition_id).await?)
    }

    pub async fn select(
        &self,
        request: SelectionRequest,
        now: DateTime<Utc>,
    ) -> Result<SelectionOutcome, ComparisonError> {
        Ok(self.selections.select(request, now).await?)
    }

    pub async fn selection_audit(
        &self,
        requisition_id: &RequisitionId,
    ) -> Result<SelectionAudit, ComparisonError> {
        self.require_requisition(requisition_id).await?;
        let selection = self
            .store
            .selection_for(requisition_id)
            .await?
            .ok_or(SelectionError::SelectionNotFound)?;
        let approver_name = self
            .store
            .user(&selection.selected_by)
            .await?
            .map(|user| user.name);
        let notifications = self.store.notifications_for(&selection.id).await?;

        Ok(SelectionAudit {
            selection,
            approver_name,
            notifications,
        })
    }

    pub async fn retry_notifications(
        &self,
        requisition_id: &RequisitionId,
        now: DateTime<Utc>,
    ) -> Result<NotificationRetry, ComparisonError> {
        Ok(self
            .selections
            .retry_notifications(requisition_id, now)
            .await?)
    }

    pub async fn retry_purchase_order(
        &self,
        requisition_id: &RequisitionId,
    ) -> Result<PurchaseOrderId, ComparisonError> {
        Ok(self.selections.retry_purchase_order(requisition_id).await?)
    }

    /// Capture a negotiation snapshot and fire ALL_COMPLETED when it finishes the set.
    ///
    /// A report failure here is logged and left to the scheduler or a manual trigger;
    /// the capture itself stands.
    pub async fn record_negotiation(
        &self,
        session: NegotiationSession,
        now: DateTime<Utc>,
    ) -> Result<NegotiationRecorded, ComparisonError> {
        let requisition_id = session.requisition_id.clone();
        let outcome = self
            .capture
            .capture(session, now)
            .await
            .map_err(not_found_as_requisition)?;

        let (capture, offer) = match outcome {
            CaptureOutcome::Created(offer) => ("created", Some(offer)),
            CaptureOutcome::Updated(offer) => ("updated", Some(offer)),
            CaptureOutcome::NoOffer => ("no_offer", None),
            CaptureOutcome::Frozen => {
                return Ok(NegotiationRecorded {
                    capture: "frozen",
                    offer: None,
                    trigger: None,
                    report_id: None,
                })
            }
        };

        let (_, completion) =
            CompletionTracker::evaluate(self.store.as_ref(), &requisition_id, now).await?;
        let mut recorded = NegotiationRecorded {
            capture,
            offer,
            trigger: None,
            report_id: None,
        };
        if completion.trigger != Some(TriggerReason::AllCompleted) {
            return Ok(recorded);
        }

        recorded.trigger = Some(TriggerReason::AllCompleted);
        match self
            .reports
            .generate(&requisition_id, TriggerReason::AllCompleted, now)
            .await
        {
            Ok(ReportOutcome::Generated(report)) => {
                info!(
                    requisition_id = %requisition_id,
                    report_id = %report.id,
                    "all vendors completed; comparison report generated"
                );
                recorded.report_id = Some(report.id);
            }
            Ok(ReportOutcome::AlreadyExists(report)) => recorded.report_id = Some(report.id),
            Err(err) => warn!(
                requisition_id = %requisition_id,
                error = %err,
                "all vendors completed but the comparison report failed"
            ),
        }
        Ok(recorded)
    }

    /// One scheduler tick on demand.
    pub async fn check_deadlines(&self, now: DateTime<Utc>) -> TickSummary {
        self.scheduler.tick(now).await
    }

    async fn require_requisition(
        &self,
        requisition_id: &RequisitionId,
    ) -> Result<Requisition, ComparisonError> {
        self.store
            .requisition(requisition_id)
            .await?
            .ok_or(ComparisonError::RequisitionNotFound)
    }
}

fn not_found_as_requisition(err: RepositoryError) -> ComparisonError {
    match err {
        RepositoryError::NotFound => ComparisonError::RequisitionNotFound,
        other => ComparisonError::Repository(other),
    }
}

fn non_zero(interval: Duration) -> Duration {
    if interval.is_zero() {
        Duration::from_secs(3600)
    } else {
        interval
    }
}
