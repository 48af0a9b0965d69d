mod config;
mod rules;

pub use config::{ScoringProfile, ScoringTargets, ScoringWeights};

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::domain::{Offer, RankedOffer, Vendor, VendorId};
use rules::{score_offer, ScoringInput};

/// Per-factor sub-scores on a 0-100 scale, kept on the snapshot for audits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorScores {
    pub price: f64,
    pub delivery: f64,
    pub payment_terms: f64,
    pub vendor_rating: f64,
    pub past_performance: f64,
    pub quality_certifications: f64,
}

/// Stateless ranker applying a requisition's scoring profile to its offers.
///
/// Rank is the position by ascending total price (1 = L1). The composite score is
/// computed independently and may disagree with the price order.
pub struct RankingEngine {
    profile: ScoringProfile,
    delivery_baseline: NaiveDate,
}

impl RankingEngine {
    /// `delivery_baseline` is the date delivery lead times are counted from.
    pub fn new(profile: ScoringProfile, delivery_baseline: NaiveDate) -> Self {
        Self {
            profile,
            delivery_baseline,
        }
    }

    /// Rank every COMPLETED or SELECTED offer. Anything else never receives a rank.
    pub fn rank(&self, offers: &[Offer], vendors: &[Vendor]) -> Vec<RankedOffer> {
        let vendors: HashMap<&VendorId, &Vendor> =
            vendors.iter().map(|vendor| (&vendor.id, vendor)).collect();

        let mut eligible: Vec<&Offer> = offers
            .iter()
            .filter(|offer| offer.status.is_rankable())
            .collect();
        eligible.sort_by(|left, right| price_order(left, right));

        eligible
            .into_iter()
            .enumerate()
            .map(|(position, offer)| {
                let vendor = vendors.get(&offer.vendor_id).copied();
                let input = ScoringInput {
                    total_price: offer.total_price,
                    payment_terms: &offer.payment_terms,
                    delivery_date: offer.delivery_date,
                    rating: vendor.map(|v| v.rating).unwrap_or(0.0),
                    past_performance: vendor.map(|v| v.past_performance).unwrap_or(0.0),
                    certified: vendor.map(|v| v.certified).unwrap_or(false),
                };
                let (breakdown, score) =
                    score_offer(&input, &self.profile, self.delivery_baseline);

                RankedOffer {
                    rank: position as u32 + 1,
                    offer_id: offer.id.clone(),
                    vendor_id: offer.vendor_id.clone(),
                    vendor_name: vendor
                        .map(|v| v.name.clone())
                        .unwrap_or_else(|| offer.vendor_id.0.clone()),
                    total_price: offer.total_price,
                    unit_price: offer.unit_price,
                    payment_terms: offer.payment_terms.clone(),
                    delivery_date: offer.delivery_date,
                    utility_score: offer.utility_score,
                    score,
                    breakdown,
                }
            })
            .collect()
    }

    /// The best `n` price ranks.
    pub fn top(&self, offers: &[Offer], vendors: &[Vendor], n: usize) -> Vec<RankedOffer> {
        let mut ranked = self.rank(offers, vendors);
        ranked.truncate(n);
        ranked
    }
}

/// Ascending price; ties go to the earlier capture, then the offer id.
fn price_order(left: &Offer, right: &Offer) -> Ordering {
    left.total_price
        .cmp(&right.total_price)
        .then_with(|| left.captured_at.cmp(&right.captured_at))
        .then_with(|| left.id.cmp(&right.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::comparison::domain::{
        NegotiationState, OfferId, OfferStatus, RequisitionId, SessionId,
    };
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn profile() -> ScoringProfile {
        ScoringProfile {
            weights: ScoringWeights::default(),
            targets: ScoringTargets {
                target_price: Decimal::new(40_000, 0),
                max_price: Decimal::new(60_000, 0),
                target_delivery_days: 14,
                max_delivery_days: 60,
                min_payment_days: 0,
                target_payment_days: 60,
            },
        }
    }

    fn baseline() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 1).expect("valid date")
    }

    fn offer(id: &str, vendor: &str, price: i64, status: OfferStatus) -> Offer {
        let captured = Utc
            .with_ymd_and_hms(2025, 9, 20, 9, 0, 0)
            .single()
            .expect("valid timestamp");
        Offer {
            id: OfferId::from(id),
            requisition_id: RequisitionId::from("req-1"),
            vendor_id: VendorId::from(vendor),
            session_id: SessionId::from(format!("ses-{id}").as_str()),
            total_price: Decimal::new(price, 0),
            unit_price: Decimal::new(price, 0),
            payment_terms: "Net 30".to_string(),
            delivery_date: NaiveDate::from_ymd_opt(2025, 10, 21),
            utility_score: Some(0.5),
            status,
            negotiation_state: NegotiationState::Accepted,
            summary: String::new(),
            captured_at: captured,
            updated_at: captured,
        }
    }

    fn vendor(id: &str, rating: f64, certified: bool) -> Vendor {
        Vendor {
            id: VendorId::from(id),
            name: format!("Vendor {id}"),
            email: Some(format!("{id}@example.com")),
            rating,
            past_performance: rating,
            certified,
        }
    }

    #[test]
    fn rank_follows_price_not_score() {
        let engine = RankingEngine::new(profile(), baseline());
        let offers = vec![
            offer("a", "v-a", 100, OfferStatus::Completed),
            offer("b", "v-b", 95, OfferStatus::Completed),
            offer("c", "v-c", 110, OfferStatus::Completed),
        ];
        let vendors = vec![
            vendor("v-a", 90.0, true),
            vendor("v-b", 10.0, false),
            vendor("v-c", 100.0, true),
        ];

        let ranked = engine.rank(&offers, &vendors);
        let order: Vec<(&str, u32)> = ranked
            .iter()
            .map(|entry| (entry.offer_id.as_str(), entry.rank))
            .collect();
        assert_eq!(order, vec![("b", 1), ("a", 2), ("c", 3)]);
        assert!(
            ranked[2].score > ranked[0].score,
            "pricier certified vendor should outscore the cheapest"
        );
    }

    #[test]
    fn excluded_and_pending_offers_are_never_ranked() {
        let engine = RankingEngine::new(profile(), baseline());
        let offers = vec![
            offer("a", "v-a", 45_000, OfferStatus::Completed),
            offer("b", "v-b", 30_000, OfferStatus::Excluded),
            offer("c", "v-c", 31_000, OfferStatus::Pending),
            offer("d", "v-d", 50_000, OfferStatus::Selected),
        ];

        let ranked = engine.rank(&offers, &[]);
        let ids: Vec<&str> = ranked.iter().map(|entry| entry.offer_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "d"]);
    }

    #[test]
    fn top_keeps_best_three_price_ranks() {
        let engine = RankingEngine::new(profile(), baseline());
        let offers: Vec<Offer> = (0..5)
            .map(|index| {
                offer(
                    &format!("o{index}"),
                    &format!("v{index}"),
                    50_000 - index * 1_000,
                    OfferStatus::Completed,
                )
            })
            .collect();

        let top = engine.top(&offers, &[], 3);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].total_price, Decimal::new(46_000, 0));
        assert_eq!(top[2].rank, 3);
        assert_eq!(top[0].label(), "L1");
    }

    #[test]
    fn raising_price_never_raises_composite_score() {
        let engine = RankingEngine::new(profile(), baseline());
        let vendors = vec![vendor("v-a", 80.0, true)];
        let mut previous = f64::MAX;
        for price in (38_000..64_000).step_by(1_000) {
            let ranked = engine.rank(
                &[offer("a", "v-a", price, OfferStatus::Completed)],
                &vendors,
            );
            assert!(ranked[0].score <= previous);
            assert!(ranked[0].breakdown.price <= 100.0);
            previous = ranked[0].score;
        }
    }

    #[test]
    fn equal_prices_tie_break_on_capture_time() {
        let engine = RankingEngine::new(profile(), baseline());
        let mut late = offer("a", "v-a", 45_000, OfferStatus::Completed);
        late.captured_at += chrono::Duration::hours(2);
        let early = offer("b", "v-b", 45_000, OfferStatus::Completed);

        let ranked = engine.rank(&[late, early], &[]);
        assert_eq!(ranked[0].offer_id.as_str(), "b");
        assert_eq!(ranked[1].rank, 2);
    }
}
