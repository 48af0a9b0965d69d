use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ranking::{FactorScores, ScoringProfile};

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

identifier!(
    /// Buyer purchase request that vendors negotiate against.
    RequisitionId
);
identifier!(VendorId);
identifier!(UserId);
identifier!(
    /// Negotiation session owned by the negotiation-capture collaborator.
    SessionId
);
identifier!(OfferId);
identifier!(ReportId);
identifier!(SelectionId);
identifier!(NotificationId);
identifier!(PurchaseOrderId);

pub(crate) fn generate_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// Lifecycle of a requisition as far as the comparison engine cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequisitionStatus {
    Draft,
    NegotiationStarted,
    Awarded,
    Cancelled,
}

impl RequisitionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::NegotiationStarted => "negotiation_started",
            Self::Awarded => "awarded",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(Self::Draft),
            "negotiation_started" => Some(Self::NegotiationStarted),
            "awarded" => Some(Self::Awarded),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub const fn is_open(self) -> bool {
        matches!(self, Self::NegotiationStarted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requisition {
    pub id: RequisitionId,
    pub title: String,
    pub quantity: u32,
    pub owner_id: Option<UserId>,
    pub status: RequisitionStatus,
    pub negotiation_closes_at: DateTime<Utc>,
    pub invited_vendors: Vec<VendorId>,
    pub scoring: ScoringProfile,
    pub awarded_price: Option<Decimal>,
    pub awarded_at: Option<DateTime<Utc>>,
}

impl Requisition {
    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.negotiation_closes_at < now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: Option<String>,
}

/// Static vendor quality attributes consumed by the ranking engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vendor {
    pub id: VendorId,
    pub name: String,
    pub email: Option<String>,
    /// 0-100, or a 0-1 fraction.
    pub rating: f64,
    /// 0-100, or a 0-1 fraction.
    pub past_performance: f64,
    pub certified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NegotiationState {
    Negotiating,
    Accepted,
    WalkedAway,
    Escalated,
}

impl NegotiationState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Negotiating => "NEGOTIATING",
            Self::Accepted => "ACCEPTED",
            Self::WalkedAway => "WALKED_AWAY",
            Self::Escalated => "ESCALATED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "NEGOTIATING" => Some(Self::Negotiating),
            "ACCEPTED" => Some(Self::Accepted),
            "WALKED_AWAY" => Some(Self::WalkedAway),
            "ESCALATED" => Some(Self::Escalated),
            _ => None,
        }
    }

    /// Accepted and walked-away sessions never change again.
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Accepted | Self::WalkedAway)
    }
}

/// Latest price and terms put on the table in a negotiation session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceOffer {
    pub total_price: Decimal,
    pub payment_terms: String,
    pub delivery_date: Option<NaiveDate>,
}

/// Snapshot of a vendor negotiation as supplied by the negotiation-capture collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationSession {
    pub id: SessionId,
    pub requisition_id: RequisitionId,
    pub vendor_id: VendorId,
    pub state: NegotiationState,
    pub rounds: u32,
    pub latest_offer: Option<PriceOffer>,
    pub utility_score: Option<f64>,
    pub summary: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferStatus {
    Pending,
    Completed,
    Excluded,
    Selected,
    Rejected,
}

impl OfferStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Excluded => "EXCLUDED",
            Self::Selected => "SELECTED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(Self::Pending),
            "COMPLETED" => Some(Self::Completed),
            "EXCLUDED" => Some(Self::Excluded),
            "SELECTED" => Some(Self::Selected),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub const fn is_rankable(self) -> bool {
        matches!(self, Self::Completed | Self::Selected)
    }

    pub const fn is_decided(self) -> bool {
        matches!(self, Self::Selected | Self::Rejected)
    }
}

/// Captured negotiation outcome, one per (requisition, session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub requisition_id: RequisitionId,
    pub vendor_id: VendorId,
    pub session_id: SessionId,
    pub total_price: Decimal,
    pub unit_price: Decimal,
    pub payment_terms: String,
    pub delivery_date: Option<NaiveDate>,
    /// Negotiation-side price favorability (0-1). Distinct from the ranking score.
    pub utility_score: Option<f64>,
    pub status: OfferStatus,
    pub negotiation_state: NegotiationState,
    pub summary: String,
    pub captured_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerReason {
    AllCompleted,
    DeadlineReached,
    Manual,
}

impl TriggerReason {
    pub const fn label(self) -> &'static str {
        match self {
            Self::AllCompleted => "ALL_COMPLETED",
            Self::DeadlineReached => "DEADLINE_REACHED",
            Self::Manual => "MANUAL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ALL_COMPLETED" => Some(Self::AllCompleted),
            "DEADLINE_REACHED" => Some(Self::DeadlineReached),
            "MANUAL" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Delivery state for the owner report email and for vendor notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(Self::Pending),
            "SENT" => Some(Self::Sent),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Denormalized snapshot row; never a live reference to the offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedOffer {
    pub rank: u32,
    pub offer_id: OfferId,
    pub vendor_id: VendorId,
    pub vendor_name: String,
    pub total_price: Decimal,
    pub unit_price: Decimal,
    pub payment_terms: String,
    pub delivery_date: Option<NaiveDate>,
    pub utility_score: Option<f64>,
    pub score: f64,
    pub breakdown: FactorScores,
}

impl RankedOffer {
    /// L1, L2, L3 ... labels used in procurement shorthand.
    pub fn label(&self) -> String {
        format!("L{}", self.rank)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub id: ReportId,
    pub requisition_id: RequisitionId,
    pub trigger: TriggerReason,
    pub total_vendors: u32,
    pub completed_vendors: u32,
    pub excluded_vendors: u32,
    pub top_offers: Vec<RankedOffer>,
    pub artifact_path: String,
    pub email_status: DeliveryStatus,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionChannel {
    EmailLink,
    Portal,
    Api,
}

impl SelectionChannel {
    pub const fn label(self) -> &'static str {
        match self {
            Self::EmailLink => "EMAIL_LINK",
            Self::Portal => "PORTAL",
            Self::Api => "API",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "EMAIL_LINK" => Some(Self::EmailLink),
            "PORTAL" => Some(Self::Portal),
            "API" => Some(Self::Api),
            _ => None,
        }
    }
}

/// The single irreversible award decision for a requisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub id: SelectionId,
    pub requisition_id: RequisitionId,
    pub report_id: Option<ReportId>,
    pub offer_id: OfferId,
    pub vendor_id: VendorId,
    pub price: Decimal,
    pub selected_by: UserId,
    pub reason: Option<String>,
    pub channel: SelectionChannel,
    pub purchase_order_id: Option<PurchaseOrderId>,
    pub selected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    SelectionWon,
    SelectionLost,
}

impl NotificationKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::SelectionWon => "SELECTION_WON",
            Self::SelectionLost => "SELECTION_LOST",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "SELECTION_WON" => Some(Self::SelectionWon),
            "SELECTION_LOST" => Some(Self::SelectionLost),
            _ => None,
        }
    }

    pub const fn template(self) -> &'static str {
        match self {
            Self::SelectionWon => "selection_won",
            Self::SelectionLost => "selection_lost",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub selection_id: SelectionId,
    pub vendor_id: VendorId,
    pub offer_id: OfferId,
    pub kind: NotificationKind,
    pub status: DeliveryStatus,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_round_trip_through_parse() {
        for status in [
            OfferStatus::Pending,
            OfferStatus::Completed,
            OfferStatus::Excluded,
            OfferStatus::Selected,
            OfferStatus::Rejected,
        ] {
            assert_eq!(OfferStatus::parse(status.label()), Some(status));
        }
        assert_eq!(NegotiationState::parse("walked_away"), None);
    }

    #[test]
    fn serde_uses_the_wire_labels() {
        let json = serde_json::to_string(&TriggerReason::DeadlineReached).expect("serializes");
        assert_eq!(json, "\"DEADLINE_REACHED\"");
        let json = serde_json::to_string(&SelectionChannel::EmailLink).expect("serializes");
        assert_eq!(json, "\"EMAIL_LINK\"");
    }

    #[test]
    fn generated_ids_carry_prefix() {
        let id = generate_id("sel");
        assert!(id.starts_with("sel-"));
        assert_eq!(id.len(), "sel-".len() + 32);
    }
}
