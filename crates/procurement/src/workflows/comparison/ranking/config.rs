use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Relative importance of each factor. Expected to sum to 100, normalized by the actual sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub price: f64,
    pub delivery: f64,
    pub payment_terms: f64,
    pub vendor_rating: f64,
    pub past_performance: f64,
    pub quality_certifications: f64,
}

impl ScoringWeights {
    pub fn total(&self) -> f64 {
        [
            self.price,
            self.delivery,
            self.payment_terms,
            self.vendor_rating,
            self.past_performance,
            self.quality_certifications,
        ]
        .into_iter()
        .map(|weight| weight.max(0.0))
        .sum()
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            price: 40.0,
            delivery: 20.0,
            payment_terms: 15.0,
            vendor_rating: 10.0,
            past_performance: 10.0,
            quality_certifications: 5.0,
        }
    }
}

/// Buyer-side anchors the sub-scores are measured against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringTargets {
    pub target_price: Decimal,
    pub max_price: Decimal,
    pub target_delivery_days: i64,
    pub max_delivery_days: i64,
    pub min_payment_days: i64,
    pub target_payment_days: i64,
}

/// Per-requisition scoring rubric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringProfile {
    pub weights: ScoringWeights,
    pub targets: ScoringTargets,
}
