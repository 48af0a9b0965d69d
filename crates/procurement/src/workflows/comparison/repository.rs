use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::domain::{
    ComparisonReport, DeliveryStatus, NegotiationSession, Notification, NotificationId, Offer,
    OfferId, PurchaseOrderId, RankedOffer, ReportId, Requisition, RequisitionId, Selection,
    SelectionId, User, UserId, Vendor, VendorId,
};

/// Everything the award transaction writes, applied atomically by the store.
#[derive(Debug, Clone)]
pub struct AwardCommand {
    pub selection: Selection,
    pub awarded_at: DateTime<Utc>,
}

/// Storage abstraction for the comparison engine.
///
/// Uniqueness is the store's job: one report and one selection per requisition,
/// one offer per (requisition, session). Violations surface as
/// [`RepositoryError::Conflict`] so callers can treat a lost race as already done.
#[async_trait]
pub trait ProcurementStore: Send + Sync {
    async fn requisition(&self, id: &RequisitionId)
        -> Result<Option<Requisition>, RepositoryError>;

    /// Requisitions with negotiations started whose closure timestamp is before `now`.
    async fn requisitions_past_deadline(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Requisition>, RepositoryError>;

    async fn user(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;

    async fn vendors(&self, ids: &[VendorId]) -> Result<Vec<Vendor>, RepositoryError>;

    async fn sessions_for(
        &self,
        requisition: &RequisitionId,
    ) -> Result<Vec<NegotiationSession>, RepositoryError>;

    async fn save_session(&self, session: NegotiationSession) -> Result<(), RepositoryError>;

    async fn offers_for(&self, requisition: &RequisitionId) -> Result<Vec<Offer>, RepositoryError>;

    async fn offer(&self, id: &OfferId) -> Result<Option<Offer>, RepositoryError>;

    /// Insert or update keyed on (requisition, session); the stored offer id wins.
    async fn upsert_offer(&self, offer: Offer) -> Result<Offer, RepositoryError>;

    async fn report_for(
        &self,
        requisition: &RequisitionId,
    ) -> Result<Option<ComparisonReport>, RepositoryError>;

    /// Fails with `Conflict` when the requisition already has a report.
    async fn insert_report(
        &self,
        report: ComparisonReport,
    ) -> Result<ComparisonReport, RepositoryError>;

    async fn set_report_email_status(
        &self,
        id: &ReportId,
        status: DeliveryStatus,
    ) -> Result<(), RepositoryError>;

    /// Create the selection, mark the winner SELECTED, every other COMPLETED/PENDING
    /// offer REJECTED, and the requisition Awarded, all or nothing.
    ///
    /// Fails with `AlreadyAwarded` when the requisition is awarded or a selection exists.
    async fn award(&self, command: AwardCommand) -> Result<Selection, RepositoryError>;

    /// Record the PO on a selection that has none. The first id recorded is kept and
    /// returned; later calls leave it untouched.
    async fn set_selection_purchase_order(
        &self,
        id: &SelectionId,
        purchase_order: &PurchaseOrderId,
    ) -> Result<PurchaseOrderId, RepositoryError>;

    async fn selection_for(
        &self,
        requisition: &RequisitionId,
    ) -> Result<Option<Selection>, RepositoryError>;

    async fn insert_notifications(
        &self,
        notifications: Vec<Notification>,
    ) -> Result<(), RepositoryError>;

    async fn set_notification_status(
        &self,
        id: &NotificationId,
        status: DeliveryStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn notifications_for(
        &self,
        selection: &SelectionId,
    ) -> Result<Vec<Notification>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("requisition already awarded")]
    AlreadyAwarded,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Requisition metadata and ranked rows handed to the document renderer.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonDocument {
    pub report_id: ReportId,
    pub requisition_id: RequisitionId,
    pub requisition_title: String,
    pub owner_name: String,
    pub generated_at: DateTime<Utc>,
    pub trigger_label: &'static str,
    pub total_vendors: u32,
    pub completed_vendors: u32,
    pub excluded_vendors: u32,
    pub offers: Vec<RankedOffer>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifact {
    pub path: String,
    pub content_type: String,
}

/// Document-rendering collaborator.
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(&self, document: &ComparisonDocument)
        -> Result<RenderedArtifact, RenderError>;

    async fn read_artifact(&self, path: &str) -> Result<Vec<u8>, RenderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("report rendering failed: {0}")]
    Backend(String),
    #[error("report artifact unavailable: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound message handed to the notification collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub recipient: String,
    pub template: String,
    pub payload: BTreeMap<String, String>,
    pub attachment: Option<String>,
}

/// Notification-dispatch collaborator. Retries and transport are its own concern.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, message: OutboundMessage) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
    #[error("recipient rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseOrderRequest {
    /// Idempotency key: one selection yields one purchase order.
    pub selection_id: SelectionId,
    pub requisition_id: RequisitionId,
    pub vendor_id: VendorId,
    pub offer_id: OfferId,
    pub total_price: Decimal,
    pub unit_price: Decimal,
    pub payment_terms: String,
    pub delivery_date: Option<NaiveDate>,
}

/// Purchase-order collaborator; this engine only decides that a PO should exist.
///
/// Implementations must answer repeated requests for the same `selection_id` with the
/// same purchase order, since `select` and a retry may both ask for it.
#[async_trait]
pub trait PurchaseOrderIssuer: Send + Sync {
    async fn issue(&self, request: PurchaseOrderRequest)
        -> Result<PurchaseOrderId, IssueError>;
}

#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("purchase order service unavailable: {0}")]
    Unavailable(String),
    #[error("purchase order rejected: {0}")]
    Rejected(String),
}
