use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{
    NegotiationSession, NegotiationState, Offer, Requisition, RequisitionId, SessionId,
    TriggerReason, VendorId,
};
use super::repository::{ProcurementStore, RepositoryError};

/// Where one invited vendor stands in the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorProgress {
    Completed,
    Pending,
    Excluded,
}

#[derive(Debug, Clone, Serialize)]
pub struct VendorCompletion {
    pub vendor_id: VendorId,
    pub progress: VendorProgress,
    pub session_id: Option<SessionId>,
    pub negotiation_state: Option<NegotiationState>,
}

/// Counts and trigger decision for a requisition at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionStatus {
    pub requisition_id: RequisitionId,
    pub total_vendors: u32,
    pub completed_vendors: u32,
    pub pending_vendors: u32,
    pub excluded_vendors: u32,
    pub all_completed: bool,
    pub deadline_passed: bool,
    pub report_exists: bool,
    pub trigger: Option<TriggerReason>,
    pub vendors: Vec<VendorCompletion>,
}

impl CompletionStatus {
    pub fn should_trigger(&self) -> bool {
        self.trigger.is_some()
    }
}

/// Classify a vendor by its most recent negotiation session.
pub fn classify(session: Option<&NegotiationSession>) -> VendorProgress {
    let Some(session) = session else {
        return VendorProgress::Pending;
    };

    match session.state {
        NegotiationState::Accepted => VendorProgress::Completed,
        NegotiationState::WalkedAway => VendorProgress::Excluded,
        // An escalation only counts once a resolving offer and utility are on record.
        NegotiationState::Escalated
            if session.latest_offer.is_some() && session.utility_score.is_some() =>
        {
            VendorProgress::Completed
        }
        NegotiationState::Escalated | NegotiationState::Negotiating => VendorProgress::Pending,
    }
}

/// Most recently updated session per vendor; ties keep the session seen first.
pub fn latest_sessions(
    sessions: &[NegotiationSession],
) -> HashMap<&VendorId, &NegotiationSession> {
    let mut latest: HashMap<&VendorId, &NegotiationSession> = HashMap::new();
    for session in sessions {
        latest
            .entry(&session.vendor_id)
            .and_modify(|current| {
                if session.updated_at > current.updated_at {
                    *current = session;
                }
            })
            .or_insert(session);
    }
    latest
}

/// Drop offers captured from a session the vendor has since moved past, leaving at
/// most one offer per vendor. Offers whose vendor has no recorded session are kept.
pub fn current_offers(offers: Vec<Offer>, sessions: &[NegotiationSession]) -> Vec<Offer> {
    let latest = latest_sessions(sessions);
    offers
        .into_iter()
        .filter(|offer| {
            latest
                .get(&offer.vendor_id)
                .map_or(true, |session| session.id == offer.session_id)
        })
        .collect()
}

pub struct CompletionTracker;

impl CompletionTracker {
    /// Pure assessment over already-loaded state.
    pub fn assess(
        requisition: &Requisition,
        sessions: &[NegotiationSession],
        report_exists: bool,
        now: DateTime<Utc>,
    ) -> CompletionStatus {
        let latest = latest_sessions(sessions);

        let vendors: Vec<VendorCompletion> = requisition
            .invited_vendors
            .iter()
            .map(|vendor_id| {
                let session = latest.get(vendor_id).copied();
                VendorCompletion {
                    vendor_id: vendor_id.clone(),
                    progress: classify(session),
                    session_id: session.map(|s| s.id.clone()),
                    negotiation_state: session.map(|s| s.state),
                }
            })
            .collect();

        let count = |progress: VendorProgress| {
            vendors
                .iter()
                .filter(|vendor| vendor.progress == progress)
                .count() as u32
        };
        let total_vendors = vendors.len() as u32;
        let completed_vendors = count(VendorProgress::Completed);
        let pending_vendors = count(VendorProgress::Pending);
        let excluded_vendors = count(VendorProgress::Excluded);

        let all_completed = pending_vendors == 0 && total_vendors > 0;
        let deadline_passed = requisition.deadline_passed(now);

        let trigger = if report_exists || !requisition.status.is_open() || completed_vendors == 0
        {
            None
        } else if all_completed {
            Some(TriggerReason::AllCompleted)
        } else if deadline_passed {
            Some(TriggerReason::DeadlineReached)
        } else {
            None
        };

        CompletionStatus {
            requisition_id: requisition.id.clone(),
            total_vendors,
            completed_vendors,
            pending_vendors,
            excluded_vendors,
            all_completed,
            deadline_passed,
            report_exists,
            trigger,
            vendors,
        }
    }

    /// Load the requisition state from the store and assess it.
    pub async fn evaluate(
        store: &dyn ProcurementStore,
        requisition_id: &RequisitionId,
        now: DateTime<Utc>,
    ) -> Result<(Requisition, CompletionStatus), RepositoryError> {
        let requisition = store
            .requisition(requisition_id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        let sessions = store.sessions_for(requisition_id).await?;
        let report_exists = store.report_for(requisition_id).await?.is_some();

        let status = Self::assess(&requisition, &sessions, report_exists, now);
        Ok((requisition, status))
    }
}
