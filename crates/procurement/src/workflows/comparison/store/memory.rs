use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::workflows::comparison::domain::{
    ComparisonReport, DeliveryStatus, NegotiationSession, Notification, NotificationId, Offer,
    OfferId, OfferStatus, PurchaseOrderId, ReportId, Requisition, RequisitionId,
    RequisitionStatus, Selection, SelectionId, SessionId, User, UserId, Vendor, VendorId,
};
use crate::workflows::comparison::repository::{
    AwardCommand, ProcurementStore, RepositoryError,
};

#[derive(Default)]
struct State {
    requisitions: HashMap<RequisitionId, Requisition>,
    users: HashMap<UserId, User>,
    vendors: HashMap<VendorId, Vendor>,
    sessions: HashMap<SessionId, NegotiationSession>,
    offers: HashMap<OfferId, Offer>,
    reports: HashMap<RequisitionId, ComparisonReport>,
    selections: HashMap<RequisitionId, Selection>,
    notifications: Vec<Notification>,
}

/// Process-local store. One lock guards every table, so `award` and
/// `insert_report` are atomic with respect to each other.
#[derive(Default)]
pub struct InMemoryProcurementStore {
    state: Mutex<State>,
}

impl InMemoryProcurementStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store lock poisoned".to_string()))
    }

    pub fn put_requisition(&self, requisition: Requisition) -> Result<(), RepositoryError> {
        self.lock()?
            .requisitions
            .insert(requisition.id.clone(), requisition);
        Ok(())
    }

    pub fn put_user(&self, user: User) -> Result<(), RepositoryError> {
        self.lock()?.users.insert(user.id.clone(), user);
        Ok(())
    }

    pub fn put_vendor(&self, vendor: Vendor) -> Result<(), RepositoryError> {
        self.lock()?.vendors.insert(vendor.id.clone(), vendor);
        Ok(())
    }
}

#[async_trait]
impl ProcurementStore for InMemoryProcurementStore {
    async fn requisition(
        &self,
        id: &RequisitionId,
    ) -> Result<Option<Requisition>, RepositoryError> {
        Ok(self.lock()?.requisitions.get(id).cloned())
    }

    async fn requisitions_past_deadline(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Requisition>, RepositoryError> {
        let state = self.lock()?;
        let mut due: Vec<Requisition> = state
            .requisitions
            .values()
            .filter(|requisition| {
                requisition.status == RequisitionStatus::NegotiationStarted
                    && requisition.deadline_passed(now)
            })
            .cloned()
            .collect();
        due.sort_by(|left, right| {
            left.negotiation_closes_at
                .cmp(&right.negotiation_closes_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(due)
    }

    async fn user(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.lock()?.users.get(id).cloned())
    }

    async fn vendors(&self, ids: &[VendorId]) -> Result<Vec<Vendor>, RepositoryError> {
        let state = self.lock()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.vendors.get(id).cloned())
            .collect())
    }

    async fn sessions_for(
        &self,
        requisition: &RequisitionId,
    ) -> Result<Vec<NegotiationSession>, RepositoryError> {
        let state = self.lock()?;
        let mut sessions: Vec<NegotiationSession> = state
            .sessions
            .values()
            .filter(|session| &session.requisition_id == requisition)
            .cloned()
            .collect();
        sessions.sort_by(|left, right| left.started_at.cmp(&right.started_at));
        Ok(sessions)
    }

    async fn save_session(&self, session: NegotiationSession) -> Result<(), RepositoryError> {
        self.lock()?.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn offers_for(&self, requisition: &RequisitionId) -> Result<Vec<Offer>, RepositoryError> {
        let state = self.lock()?;
        let mut offers: Vec<Offer> = state
            .offers
            .values()
            .filter(|offer| &offer.requisition_id == requisition)
            .cloned()
            .collect();
        offers.sort_by(|left, right| {
            left.captured_at
                .cmp(&right.captured_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(offers)
    }

    async fn offer(&self, id: &OfferId) -> Result<Option<Offer>, RepositoryError> {
        Ok(self.lock()?.offers.get(id).cloned())
    }

    async fn upsert_offer(&self, mut offer: Offer) -> Result<Offer, RepositoryError> {
        let mut state = self.lock()?;
        let existing = state
            .offers
            .values()
            .find(|stored| {
                stored.requisition_id == offer.requisition_id
                    && stored.session_id == offer.session_id
            })
            .map(|stored| (stored.id.clone(), stored.captured_at));

        if let Some((id, captured_at)) = existing {
            offer.id = id;
            offer.captured_at = captured_at;
        }
        state.offers.insert(offer.id.clone(), offer.clone());
        Ok(offer)
    }

    async fn report_for(
        &self,
        requisition: &RequisitionId,
    ) -> Result<Option<ComparisonReport>, RepositoryError> {
        Ok(self.lock()?.reports.get(requisition).cloned())
    }

    async fn insert_report(
        &self,
        report: ComparisonReport,
    ) -> Result<ComparisonReport, RepositoryError> {
        let mut state = self.lock()?;
        if state.reports.contains_key(&report.requisition_id) {
            return Err(RepositoryError::Conflict);
        }
        state
            .reports
            .insert(report.requisition_id.clone(), report.clone());
        Ok(report)
    }

    async fn set_report_email_status(
        &self,
        id: &ReportId,
        status: DeliveryStatus,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let report = state
            .reports
            .values_mut()
            .find(|report| &report.id == id)
            .ok_or(RepositoryError::NotFound)?;
        report.email_status = status;
        Ok(())
    }

    async fn award(&self, command: AwardCommand) -> Result<Selection, RepositoryError> {
        let AwardCommand {
            selection,
            awarded_at,
        } = command;
        let mut state = self.lock()?;

        let requisition = state
            .requisitions
            .get(&selection.requisition_id)
            .ok_or(RepositoryError::NotFound)?;
        if requisition.status == RequisitionStatus::Awarded
            || state.selections.contains_key(&selection.requisition_id)
        {
            return Err(RepositoryError::AlreadyAwarded);
        }

        let winner = state
            .offers
            .get(&selection.offer_id)
            .ok_or(RepositoryError::NotFound)?;
        if winner.requisition_id != selection.requisition_id
            || winner.status == OfferStatus::Excluded
        {
            return Err(RepositoryError::Conflict);
        }

        // Every check has passed; nothing below can fail, so the writes land together.
        for offer in state.offers.values_mut() {
            if offer.requisition_id != selection.requisition_id {
                continue;
            }
            if offer.id == selection.offer_id {
                offer.status = OfferStatus::Selected;
                offer.updated_at = awarded_at;
            } else if matches!(offer.status, OfferStatus::Completed | OfferStatus::Pending) {
                offer.status = OfferStatus::Rejected;
                offer.updated_at = awarded_at;
            }
        }

        if let Some(requisition) = state.requisitions.get_mut(&selection.requisition_id) {
            requisition.status = RequisitionStatus::Awarded;
            requisition.awarded_price = Some(selection.price);
            requisition.awarded_at = Some(awarded_at);
        }

        state
            .selections
            .insert(selection.requisition_id.clone(), selection.clone());
        Ok(selection)
    }

    async fn set_selection_purchase_order(
        &self,
        id: &SelectionId,
        purchase_order: &PurchaseOrderId,
    ) -> Result<PurchaseOrderId, RepositoryError> {
        let mut state = self.lock()?;
        let selection = state
            .selections
            .values_mut()
            .find(|selection| &selection.id == id)
            .ok_or(RepositoryError::NotFound)?;
        Ok(selection
            .purchase_order_id
            .get_or_insert_with(|| purchase_order.clone())
            .clone())
    }

    async fn selection_for(
        &self,
        requisition: &RequisitionId,
    ) -> Result<Option<Selection>, RepositoryError> {
        Ok(self.lock()?.selections.get(requisition).cloned())
    }

    async fn insert_notifications(
        &self,
        notifications: Vec<Notification>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        if notifications.iter().any(|candidate| {
            state
                .notifications
                .iter()
                .any(|stored| stored.id == candidate.id)
        }) {
            return Err(RepositoryError::Conflict);
        }
        state.notifications.extend(notifications);
        Ok(())
    }

    async fn set_notification_status(
        &self,
        id: &NotificationId,
        status: DeliveryStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let notification = state
            .notifications
            .iter_mut()
            .find(|notification| &notification.id == id)
            .ok_or(RepositoryError::NotFound)?;
        notification.status = status;
        notification.last_error = error;
        notification.updated_at = at;
        Ok(())
    }

    async fn notifications_for(
        &self,
        selection: &SelectionId,
    ) -> Result<Vec<Notification>, RepositoryError> {
        Ok(self
            .lock()?
            .notifications
            .iter()
            .filter(|notification| &notification.selection_id == selection)
            .cloned()
            .collect())
    }
}
