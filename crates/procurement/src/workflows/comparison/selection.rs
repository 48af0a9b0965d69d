use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::domain::{
    generate_id, DeliveryStatus, Notification, NotificationId, NotificationKind, Offer, OfferId,
    OfferStatus, PurchaseOrderId, Requisition, RequisitionId, RequisitionStatus, Selection,
    SelectionChannel, SelectionId, UserId, Vendor, VendorId,
};
use super::fanout::{dispatch_all, DeliveryReport, PendingDelivery};
use super::repository::{
    AwardCommand, IssueError, NotificationDispatcher, OutboundMessage, ProcurementStore,
    PurchaseOrderIssuer, PurchaseOrderRequest, RepositoryError,
};
use super::tracker::{current_offers, latest_sessions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRequest {
    pub requisition_id: RequisitionId,
    pub offer_id: OfferId,
    pub acting_user: UserId,
    pub channel: SelectionChannel,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionOutcome {
    pub selection_id: SelectionId,
    pub winning_vendor_id: VendorId,
    pub purchase_order_id: Option<PurchaseOrderId>,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
}

/// Tally of a notification retry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NotificationRetry {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("requisition not found")]
    RequisitionNotFound,
    #[error("requisition already awarded")]
    AlreadyAwarded,
    #[error("offer not found")]
    OfferNotFound,
    #[error("offer belongs to a different requisition")]
    OfferRequisitionMismatch,
    #[error("excluded offers cannot be awarded")]
    OfferExcluded,
    #[error("offer was replaced by a later negotiation with the same vendor")]
    OfferSuperseded,
    #[error("no selection has been made for this requisition")]
    SelectionNotFound,
    #[error(transparent)]
    PurchaseOrder(#[from] IssueError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Executes the award and its best-effort side effects (PO issuance, vendor fan-out).
pub struct SelectionService {
    store: Arc<dyn ProcurementStore>,
    issuer: Arc<dyn PurchaseOrderIssuer>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    concurrency: usize,
}

impl SelectionService {
    pub fn new(
        store: Arc<dyn ProcurementStore>,
        issuer: Arc<dyn PurchaseOrderIssuer>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            issuer,
            dispatcher,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn select(
        &self,
        request: SelectionRequest,
        now: DateTime<Utc>,
    ) -> Result<SelectionOutcome, SelectionError> {
        let requisition = self
            .store
            .requisition(&request.requisition_id)
            .await?
            .ok_or(SelectionError::RequisitionNotFound)?;
        if requisition.status == RequisitionStatus::Awarded {
            return Err(SelectionError::AlreadyAwarded);
        }

        let offer = self
            .store
            .offer(&request.offer_id)
            .await?
            .ok_or(SelectionError::OfferNotFound)?;
        if offer.requisition_id != requisition.id {
            return Err(SelectionError::OfferRequisitionMismatch);
        }
        if offer.status == OfferStatus::Excluded {
            return Err(SelectionError::OfferExcluded);
        }
        let sessions = self.store.sessions_for(&requisition.id).await?;
        let superseded = latest_sessions(&sessions)
            .get(&offer.vendor_id)
            .is_some_and(|session| session.id != offer.session_id);
        if superseded {
            return Err(SelectionError::OfferSuperseded);
        }

        let report = self.store.report_for(&requisition.id).await?;
        let selection = Selection {
            id: SelectionId(generate_id("sel")),
            requisition_id: requisition.id.clone(),
            report_id: report.map(|report| report.id),
            offer_id: offer.id.clone(),
            vendor_id: offer.vendor_id.clone(),
            price: offer.total_price,
            selected_by: request.acting_user,
            reason: request.reason,
            channel: request.channel,
            purchase_order_id: None,
            selected_at: now,
        };

        let selection = match self
            .store
            .award(AwardCommand {
                selection,
                awarded_at: now,
            })
            .await
        {
            Ok(selection) => selection,
            Err(RepositoryError::AlreadyAwarded) => return Err(SelectionError::AlreadyAwarded),
            // The offer was excluded between the precondition check and the award.
            Err(RepositoryError::Conflict) => return Err(SelectionError::OfferExcluded),
            Err(other) => return Err(other.into()),
        };

        info!(
            requisition_id = %selection.requisition_id,
            selection_id = %selection.id,
            offer_id = %selection.offer_id,
            vendor_id = %selection.vendor_id,
            price = %selection.price,
            channel = selection.channel.label(),
            "requisition awarded"
        );

        let purchase_order_id = self.issue_purchase_order(&selection, &offer).await;

        let reports = match self.notify_vendors(&requisition, &selection, now).await {
            Ok(reports) => reports,
            Err(err) => {
                error!(
                    requisition_id = %selection.requisition_id,
                    selection_id = %selection.id,
                    error = %err,
                    "vendor notifications could not be prepared"
                );
                Vec::new()
            }
        };
        let notifications_sent = reports.iter().filter(|report| report.delivered()).count();

        Ok(SelectionOutcome {
            selection_id: selection.id,
            winning_vendor_id: selection.vendor_id,
            purchase_order_id,
            notifications_sent,
            notifications_failed: reports.len() - notifications_sent,
        })
    }

    /// Re-dispatch notifications that are not yet SENT. Award state is untouched.
    pub async fn retry_notifications(
        &self,
        requisition_id: &RequisitionId,
        now: DateTime<Utc>,
    ) -> Result<NotificationRetry, SelectionError> {
        let requisition = self
            .store
            .requisition(requisition_id)
            .await?
            .ok_or(SelectionError::RequisitionNotFound)?;
        let selection = self
            .store
            .selection_for(requisition_id)
            .await?
            .ok_or(SelectionError::SelectionNotFound)?;

        let outstanding: Vec<Notification> = self
            .store
            .notifications_for(&selection.id)
            .await?
            .into_iter()
            .filter(|notification| notification.status != DeliveryStatus::Sent)
            .collect();
        if outstanding.is_empty() {
            return Ok(NotificationRetry::default());
        }

        let reports = self
            .deliver(&requisition, &selection, &outstanding, now)
            .await?;
        let sent = reports.iter().filter(|report| report.delivered()).count();
        Ok(NotificationRetry {
            attempted: reports.len(),
            sent,
            failed: reports.len() - sent,
        })
    }

    /// Request a PO for an award that has none yet. Returns the existing id when one
    /// was already recorded.
    pub async fn retry_purchase_order(
        &self,
        requisition_id: &RequisitionId,
    ) -> Result<PurchaseOrderId, SelectionError> {
        let selection = self
            .store
            .selection_for(requisition_id)
            .await?
            .ok_or(SelectionError::SelectionNotFound)?;
        if let Some(existing) = selection.purchase_order_id {
            return Ok(existing);
        }

        let offer = self
            .store
            .offer(&selection.offer_id)
            .await?
            .ok_or(SelectionError::OfferNotFound)?;
        let issued = self
            .issuer
            .issue(purchase_order_request(&selection, &offer))
            .await?;
        let recorded = self
            .store
            .set_selection_purchase_order(&selection.id, &issued)
            .await?;
        note_if_superseded(&selection, &issued, &recorded);

        info!(
            requisition_id = %selection.requisition_id,
            purchase_order_id = %recorded,
            "purchase order issued on retry"
        );
        Ok(recorded)
    }

    async fn issue_purchase_order(
        &self,
        selection: &Selection,
        offer: &Offer,
    ) -> Option<PurchaseOrderId> {
        let purchase_order = match self
            .issuer
            .issue(purchase_order_request(selection, offer))
            .await
        {
            Ok(id) => id,
            Err(err) => {
                warn!(
                    requisition_id = %selection.requisition_id,
                    selection_id = %selection.id,
                    offer_id = %selection.offer_id,
                    error = %err,
                    "purchase order issuance failed; award stands, PO needs manual creation"
                );
                return None;
            }
        };

        match self
            .store
            .set_selection_purchase_order(&selection.id, &purchase_order)
            .await
        {
            Ok(recorded) => {
                note_if_superseded(selection, &purchase_order, &recorded);
                Some(recorded)
            }
            Err(err) => {
                error!(
                    requisition_id = %selection.requisition_id,
                    purchase_order_id = %purchase_order,
                    error = %err,
                    "purchase order issued but not recorded on the selection"
                );
                Some(purchase_order)
            }
        }
    }

    async fn notify_vendors(
        &self,
        requisition: &Requisition,
        selection: &Selection,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryReport>, SelectionError> {
        let sessions = self.store.sessions_for(&selection.requisition_id).await?;
        let offers = self.store.offers_for(&selection.requisition_id).await?;
        // One notification per vendor: the winner hears only about the winning offer.
        let notifications: Vec<Notification> = current_offers(offers, &sessions)
            .into_iter()
            .filter(|offer| offer.status != OfferStatus::Excluded)
            .filter(|offer| {
                offer.id == selection.offer_id || offer.vendor_id != selection.vendor_id
            })
            .map(|offer| Notification {
                id: NotificationId(generate_id("ntf")),
                selection_id: selection.id.clone(),
                kind: if offer.id == selection.offer_id {
                    NotificationKind::SelectionWon
                } else {
                    NotificationKind::SelectionLost
                },
                vendor_id: offer.vendor_id,
                offer_id: offer.id,
                status: DeliveryStatus::Pending,
                last_error: None,
                updated_at: now,
            })
            .collect();

        self.store.insert_notifications(notifications.clone()).await?;
        self.deliver(requisition, selection, &notifications, now)
            .await
    }

    /// Fan out, then record one status per notification.
    async fn deliver(
        &self,
        requisition: &Requisition,
        selection: &Selection,
        notifications: &[Notification],
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryReport>, SelectionError> {
        let vendor_ids: Vec<VendorId> = notifications
            .iter()
            .map(|notification| notification.vendor_id.clone())
            .collect();
        let vendors: HashMap<VendorId, Vendor> = self
            .store
            .vendors(&vendor_ids)
            .await?
            .into_iter()
            .map(|vendor| (vendor.id.clone(), vendor))
            .collect();

        let deliveries: Vec<PendingDelivery> = notifications
            .iter()
            .map(|notification| PendingDelivery {
                notification_id: notification.id.clone(),
                vendor_id: notification.vendor_id.clone(),
                message: vendors.get(&notification.vendor_id).and_then(|vendor| {
                    vendor_message(requisition, selection, vendor, notification.kind)
                }),
            })
            .collect();

        let reports = dispatch_all(Arc::clone(&self.dispatcher), deliveries, self.concurrency).await;

        for report in &reports {
            let (status, last_error) = match &report.result {
                Ok(()) => (DeliveryStatus::Sent, None),
                Err(reason) => {
                    warn!(
                        requisition_id = %selection.requisition_id,
                        vendor_id = %report.vendor_id,
                        notification_id = %report.notification_id,
                        error = %reason,
                        "vendor notification failed"
                    );
                    (DeliveryStatus::Failed, Some(reason.clone()))
                }
            };
            if let Err(err) = self
                .store
                .set_notification_status(&report.notification_id, status, last_error, now)
                .await
            {
                error!(
                    notification_id = %report.notification_id,
                    error = %err,
                    "notification status not recorded"
                );
            }
        }

        Ok(reports)
    }
}

/// An issuer that ignored the selection key can hand back a second PO; the stored one wins.
fn note_if_superseded(
    selection: &Selection,
    issued: &PurchaseOrderId,
    recorded: &PurchaseOrderId,
) {
    if issued != recorded {
        warn!(
            requisition_id = %selection.requisition_id,
            selection_id = %selection.id,
            issued = %issued,
            recorded = %recorded,
            "selection already carries a purchase order; keeping the recorded one"
        );
    }
}

fn purchase_order_request(selection: &Selection, offer: &Offer) -> PurchaseOrderRequest {
    PurchaseOrderRequest {
        selection_id: selection.id.clone(),
        requisition_id: selection.requisition_id.clone(),
        vendor_id: selection.vendor_id.clone(),
        offer_id: offer.id.clone(),
        total_price: offer.total_price,
        unit_price: offer.unit_price,
        payment_terms: offer.payment_terms.clone(),
        delivery_date: offer.delivery_date,
    }
}

fn vendor_message(
    requisition: &Requisition,
    selection: &Selection,
    vendor: &Vendor,
    kind: NotificationKind,
) -> Option<OutboundMessage> {
    let recipient = vendor
        .email
        .as_deref()
        .map(str::trim)
        .filter(|email| !email.is_empty())?;

    let mut payload = BTreeMap::new();
    payload.insert("requisition_id".to_string(), requisition.id.to_string());
    payload.insert("requisition_title".to_string(), requisition.title.clone());
    payload.insert("vendor_name".to_string(), vendor.name.clone());
    payload.insert("selection_id".to_string(), selection.id.to_string());
    if kind == NotificationKind::SelectionWon {
        payload.insert("awarded_price".to_string(), selection.price.to_string());
    }

    Some(OutboundMessage {
        recipient: recipient.to_string(),
        template: kind.template().to_string(),
        payload,
        attachment: None,
    })
}
