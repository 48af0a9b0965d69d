//! Vendor bid comparison: offer capture, completion tracking, ranking, the
//! comparison report, and the single award decision with its fan-out.

pub mod capture;
pub mod domain;
mod fanout;
pub mod ranking;
pub mod report;
pub mod repository;
pub mod router;
pub mod scheduler;
pub mod selection;
pub mod service;
pub mod store;
pub mod tracker;

#[cfg(test)]
mod tests;

pub use capture::{CaptureOutcome, OfferCapture};
pub use domain::{
    ComparisonReport, DeliveryStatus, NegotiationSession, NegotiationState, Notification,
    NotificationId, NotificationKind, Offer, OfferId, OfferStatus, PriceOffer, PurchaseOrderId,
    RankedOffer, ReportId, Requisition, RequisitionId, RequisitionStatus, Selection,
    SelectionChannel, SelectionId, SessionId, TriggerReason, User, UserId, Vendor, VendorId,
};
pub use ranking::{FactorScores, RankingEngine, ScoringProfile, ScoringTargets, ScoringWeights};
pub use report::{HtmlReportRenderer, ReportError, ReportGenerator, ReportOutcome};
pub use repository::{
    AwardCommand, ComparisonDocument, DispatchError, IssueError, NotificationDispatcher,
    OutboundMessage, ProcurementStore, PurchaseOrderIssuer, PurchaseOrderRequest, RenderError,
    RenderedArtifact, ReportRenderer, RepositoryError,
};
pub use router::comparison_router;
pub use scheduler::{DeadlineScheduler, TickSummary};
pub use selection::{
    NotificationRetry, SelectionError, SelectionOutcome, SelectionRequest, SelectionService,
};
pub use service::{
    BidView, BidsView, ComparisonError, ComparisonService, ComparisonStatusView, GenerateView,
    NegotiationRecorded, RankingSource, ReportArtifact, ReportSummary, SelectionAudit,
    SelectionSummary, TopOffersView,
};
pub use store::{InMemoryProcurementStore, SqliteProcurementStore};
pub use tracker::{CompletionStatus, CompletionTracker, VendorCompletion, VendorProgress};
