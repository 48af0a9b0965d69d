use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use super::domain::{generate_id, NegotiationSession, Offer, OfferId, OfferStatus, Requisition};
use super::repository::{ProcurementStore, RepositoryError};
use super::tracker::{classify, VendorProgress};

/// What happened to a negotiation snapshot handed to [`OfferCapture::capture`].
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Created(Offer),
    Updated(Offer),
    /// Session recorded, but no offer is on the table yet.
    NoOffer,
    /// The offer or the requisition is already settled; nothing changed.
    Frozen,
}

/// Ingress adapter for the negotiation-capture collaborator and the only
/// writer of offer price and terms.
pub struct OfferCapture {
    store: Arc<dyn ProcurementStore>,
}

impl OfferCapture {
    pub fn new(store: Arc<dyn ProcurementStore>) -> Self {
        Self { store }
    }

    pub async fn capture(
        &self,
        session: NegotiationSession,
        now: DateTime<Utc>,
    ) -> Result<CaptureOutcome, RepositoryError> {
        let requisition = self
            .store
            .requisition(&session.requisition_id)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        if !requisition.invited_vendors.contains(&session.vendor_id) {
            debug!(
                requisition_id = %session.requisition_id,
                vendor_id = %session.vendor_id,
                "ignoring negotiation from uninvited vendor"
            );
            return Ok(CaptureOutcome::Frozen);
        }

        let existing = self
            .store
            .offers_for(&session.requisition_id)
            .await?
            .into_iter()
            .find(|offer| offer.session_id == session.id);

        let frozen = !requisition.status.is_open()
            || existing.as_ref().is_some_and(|offer| {
                offer.status.is_decided() || offer.negotiation_state.is_final()
            });
        if frozen {
            return Ok(CaptureOutcome::Frozen);
        }

        self.store.save_session(session.clone()).await?;

        let Some(latest) = session.latest_offer.as_ref() else {
            return Ok(CaptureOutcome::NoOffer);
        };

        let status = match classify(Some(&session)) {
            VendorProgress::Completed => OfferStatus::Completed,
            VendorProgress::Excluded => OfferStatus::Excluded,
            VendorProgress::Pending => OfferStatus::Pending,
        };

        let offer = Offer {
            id: existing
                .as_ref()
                .map(|offer| offer.id.clone())
                .unwrap_or_else(|| OfferId(generate_id("off"))),
            requisition_id: session.requisition_id.clone(),
            vendor_id: session.vendor_id.clone(),
            session_id: session.id.clone(),
            total_price: latest.total_price,
            unit_price: unit_price(latest.total_price, &requisition),
            payment_terms: latest.payment_terms.clone(),
            delivery_date: latest.delivery_date,
            utility_score: session.utility_score,
            status,
            negotiation_state: session.state,
            summary: session.summary.clone(),
            captured_at: existing
                .as_ref()
                .map(|offer| offer.captured_at)
                .unwrap_or(now),
            updated_at: now,
        };

        let stored = self.store.upsert_offer(offer).await?;
        Ok(if existing.is_some() {
            CaptureOutcome::Updated(stored)
        } else {
            CaptureOutcome::Created(stored)
        })
    }
}

fn unit_price(total: Decimal, requisition: &Requisition) -> Decimal {
    if requisition.quantity == 0 {
        return total;
    }
    (total / Decimal::from(requisition.quantity))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
