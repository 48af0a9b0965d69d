mod document;

pub use document::HtmlReportRenderer;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::domain::{
    generate_id, ComparisonReport, DeliveryStatus, ReportId, Requisition, RequisitionId,
    TriggerReason, User, VendorId,
};
use super::ranking::RankingEngine;
use super::repository::{
    ComparisonDocument, NotificationDispatcher, OutboundMessage, ProcurementStore, RenderError,
    ReportRenderer, RepositoryError,
};
use super::tracker::{current_offers, CompletionTracker};

pub(crate) const REPORT_READY_TEMPLATE: &str = "comparison_report_ready";

/// Result of a generation request. A report that already exists is returned as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    Generated(ComparisonReport),
    AlreadyExists(ComparisonReport),
}

impl ReportOutcome {
    pub fn report(&self) -> &ComparisonReport {
        match self {
            Self::Generated(report) | Self::AlreadyExists(report) => report,
        }
    }

    pub fn into_report(self) -> ComparisonReport {
        match self {
            Self::Generated(report) | Self::AlreadyExists(report) => report,
        }
    }

    pub fn was_generated(&self) -> bool {
        matches!(self, Self::Generated(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("requisition not found")]
    RequisitionNotFound,
    #[error("no comparison report has been generated for this requisition")]
    ReportNotFound,
    #[error("requisition has no owner to receive the report")]
    MissingOwner,
    #[error("requisition owner has no email address")]
    MissingOwnerEmail,
    #[error("no completed offers to compare")]
    NoCompletedOffers,
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Builds, persists and delivers the one comparison report a requisition gets.
pub struct ReportGenerator {
    store: Arc<dyn ProcurementStore>,
    renderer: Arc<dyn ReportRenderer>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    top_n: usize,
}

impl ReportGenerator {
    pub fn new(
        store: Arc<dyn ProcurementStore>,
        renderer: Arc<dyn ReportRenderer>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        top_n: usize,
    ) -> Self {
        Self {
            store,
            renderer,
            dispatcher,
            top_n: top_n.max(1),
        }
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }

    /// Rank, render, persist, then email the owner.
    ///
    /// Rendering failures abort before anything is stored. Once the report row is
    /// committed it stands, whatever happens to the owner email.
    pub async fn generate(
        &self,
        requisition_id: &RequisitionId,
        reason: TriggerReason,
        now: DateTime<Utc>,
    ) -> Result<ReportOutcome, ReportError> {
        let requisition = self
            .store
            .requisition(requisition_id)
            .await?
            .ok_or(ReportError::RequisitionNotFound)?;

        if let Some(existing) = self.store.report_for(requisition_id).await? {
            return Ok(ReportOutcome::AlreadyExists(existing));
        }

        let (owner, email) = self.owner_contact(&requisition).await?;

        let sessions = self.store.sessions_for(requisition_id).await?;
        let completion = CompletionTracker::assess(&requisition, &sessions, false, now);

        let offers = current_offers(self.store.offers_for(requisition_id).await?, &sessions);
        let vendor_ids: Vec<VendorId> = offers.iter().map(|offer| offer.vendor_id.clone()).collect();
        let vendors = self.store.vendors(&vendor_ids).await?;
        let engine = RankingEngine::new(
            requisition.scoring.clone(),
            requisition.negotiation_closes_at.date_naive(),
        );
        let top_offers = engine.top(&offers, &vendors, self.top_n);
        if top_offers.is_empty() {
            return Err(ReportError::NoCompletedOffers);
        }

        let document = ComparisonDocument {
            report_id: ReportId(generate_id("rpt")),
            requisition_id: requisition.id.clone(),
            requisition_title: requisition.title.clone(),
            owner_name: owner.name.clone(),
            generated_at: now,
            trigger_label: reason.label(),
            total_vendors: completion.total_vendors,
            completed_vendors: completion.completed_vendors,
            excluded_vendors: completion.excluded_vendors,
            offers: top_offers,
        };
        let artifact = self.renderer.render(&document).await?;

        let report = ComparisonReport {
            id: document.report_id,
            requisition_id: requisition.id.clone(),
            trigger: reason,
            total_vendors: document.total_vendors,
            completed_vendors: document.completed_vendors,
            excluded_vendors: document.excluded_vendors,
            top_offers: document.offers,
            artifact_path: artifact.path,
            email_status: DeliveryStatus::Pending,
            generated_at: now,
        };

        let report = match self.store.insert_report(report).await {
            Ok(report) => report,
            Err(RepositoryError::Conflict) => {
                info!(
                    requisition_id = %requisition.id,
                    reason = reason.label(),
                    "comparison report already generated by a concurrent trigger"
                );
                return self
                    .store
                    .report_for(requisition_id)
                    .await?
                    .map(ReportOutcome::AlreadyExists)
                    .ok_or(ReportError::Repository(RepositoryError::Conflict));
            }
            Err(other) => return Err(other.into()),
        };

        info!(
            requisition_id = %report.requisition_id,
            report_id = %report.id,
            reason = reason.label(),
            offers = report.top_offers.len(),
            "comparison report generated"
        );

        let report = self.deliver(report, &requisition, &owner, &email).await?;
        Ok(ReportOutcome::Generated(report))
    }

    /// Send the stored report to the owner again and record the new email status.
    pub async fn resend_email(
        &self,
        requisition_id: &RequisitionId,
    ) -> Result<ComparisonReport, ReportError> {
        let requisition = self
            .store
            .requisition(requisition_id)
            .await?
            .ok_or(ReportError::RequisitionNotFound)?;
        let report = self
            .store
            .report_for(requisition_id)
            .await?
            .ok_or(ReportError::ReportNotFound)?;
        let (owner, email) = self.owner_contact(&requisition).await?;

        self.deliver(report, &requisition, &owner, &email).await
    }

    /// Stored report and the bytes of its artifact.
    pub async fn artifact(
        &self,
        requisition_id: &RequisitionId,
    ) -> Result<(ComparisonReport, Vec<u8>), ReportError> {
        let report = self
            .store
            .report_for(requisition_id)
            .await?
            .ok_or(ReportError::ReportNotFound)?;
        let bytes = self.renderer.read_artifact(&report.artifact_path).await?;
        Ok((report, bytes))
    }

    async fn owner_contact(&self, requisition: &Requisition) -> Result<(User, String), ReportError> {
        let owner_id = requisition
            .owner_id
            .as_ref()
            .ok_or(ReportError::MissingOwner)?;
        let owner = self
            .store
            .user(owner_id)
            .await?
            .ok_or(ReportError::MissingOwner)?;
        let email = owner
            .email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .map(str::to_string)
            .ok_or(ReportError::MissingOwnerEmail)?;
        Ok((owner, email))
    }

    async fn deliver(
        &self,
        mut report: ComparisonReport,
        requisition: &Requisition,
        owner: &User,
        email: &str,
    ) -> Result<ComparisonReport, ReportError> {
        let mut payload = BTreeMap::new();
        payload.insert("requisition_id".to_string(), requisition.id.to_string());
        payload.insert("requisition_title".to_string(), requisition.title.clone());
        payload.insert("owner_name".to_string(), owner.name.clone());
        payload.insert("report_id".to_string(), report.id.to_string());
        payload.insert("trigger".to_string(), report.trigger.label().to_string());
        payload.insert(
            "offers_compared".to_string(),
            report.top_offers.len().to_string(),
        );
        if let Some(leader) = report.top_offers.first() {
            payload.insert("l1_vendor".to_string(), leader.vendor_name.clone());
            payload.insert("l1_price".to_string(), leader.total_price.to_string());
        }

        let message = OutboundMessage {
            recipient: email.to_string(),
            template: REPORT_READY_TEMPLATE.to_string(),
            payload,
            attachment: Some(report.artifact_path.clone()),
        };

        let status = match self.dispatcher.dispatch(message).await {
            Ok(()) => DeliveryStatus::Sent,
            Err(err) => {
                warn!(
                    requisition_id = %report.requisition_id,
                    report_id = %report.id,
                    error = %err,
                    "comparison report email failed; available for manual resend"
                );
                DeliveryStatus::Failed
            }
        };

        self.store.set_report_email_status(&report.id, status).await?;
        report.email_status = status;
        Ok(report)
    }
}
