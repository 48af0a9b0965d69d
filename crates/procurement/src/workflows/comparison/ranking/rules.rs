use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::config::{ScoringProfile, ScoringTargets, ScoringWeights};
use super::FactorScores;

/// Inputs for a single offer after joining vendor attributes.
pub(crate) struct ScoringInput<'a> {
    pub total_price: Decimal,
    pub payment_terms: &'a str,
    pub delivery_date: Option<NaiveDate>,
    pub rating: f64,
    pub past_performance: f64,
    pub certified: bool,
}

pub(crate) fn score_offer(
    input: &ScoringInput<'_>,
    profile: &ScoringProfile,
    delivery_baseline: NaiveDate,
) -> (FactorScores, f64) {
    let targets = &profile.targets;
    let breakdown = FactorScores {
        price: price_score(input.total_price, targets),
        delivery: input
            .delivery_date
            .map(|date| delivery_score((date - delivery_baseline).num_days(), targets))
            .unwrap_or(0.0),
        payment_terms: payment_terms_score(parse_net_days(input.payment_terms), targets),
        vendor_rating: percentage(input.rating),
        past_performance: percentage(input.past_performance),
        quality_certifications: if input.certified { 100.0 } else { 0.0 },
    };

    let composite = weighted_total(&breakdown, &profile.weights);
    (breakdown, composite)
}

pub(crate) fn weighted_total(scores: &FactorScores, weights: &ScoringWeights) -> f64 {
    let total_weight = weights.total();
    if total_weight <= 0.0 {
        return 0.0;
    }

    let weighted = scores.price * weights.price.max(0.0)
        + scores.delivery * weights.delivery.max(0.0)
        + scores.payment_terms * weights.payment_terms.max(0.0)
        + scores.vendor_rating * weights.vendor_rating.max(0.0)
        + scores.past_performance * weights.past_performance.max(0.0)
        + scores.quality_certifications * weights.quality_certifications.max(0.0);

    round2((weighted / total_weight).clamp(0.0, 100.0))
}

/// 100 at or below target, 0 at or above the ceiling, linear in between.
pub(crate) fn price_score(price: Decimal, targets: &ScoringTargets) -> f64 {
    let price = price.to_f64().unwrap_or(f64::MAX);
    let target = targets.target_price.to_f64().unwrap_or(0.0);
    let ceiling = targets.max_price.to_f64().unwrap_or(0.0);
    descending_scale(price, target, ceiling)
}

pub(crate) fn delivery_score(days: i64, targets: &ScoringTargets) -> f64 {
    descending_scale(
        days as f64,
        targets.target_delivery_days as f64,
        targets.max_delivery_days as f64,
    )
}

/// Longer net terms favor the buyer: 0 at the minimum, 100 at the target.
pub(crate) fn payment_terms_score(net_days: i64, targets: &ScoringTargets) -> f64 {
    let floor = targets.min_payment_days as f64;
    let target = targets.target_payment_days as f64;
    let days = net_days as f64;

    if target <= floor {
        return if days >= target { 100.0 } else { 0.0 };
    }

    (((days - floor) / (target - floor)) * 100.0).clamp(0.0, 100.0)
}

fn descending_scale(value: f64, best: f64, worst: f64) -> f64 {
    if value <= best {
        return 100.0;
    }
    if worst <= best || value >= worst {
        return 0.0;
    }
    ((worst - value) / (worst - best) * 100.0).clamp(0.0, 100.0)
}

/// Accepts 0-100 or 0-1 inputs.
pub(crate) fn percentage(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let scaled = if value <= 1.0 { value * 100.0 } else { value };
    scaled.clamp(0.0, 100.0)
}

/// Net days from a terms string: the number after "net" when present ("2/10 Net 30"
/// is 30), else the first integer ("45 days"). Immediate terms are 0.
pub(crate) fn parse_net_days(terms: &str) -> i64 {
    let lowered = terms.to_ascii_lowercase();
    let tail = lowered
        .find("net")
        .map(|at| &lowered[at + 3..])
        .filter(|tail| tail.chars().any(|ch| ch.is_ascii_digit()))
        .unwrap_or(lowered.as_str());
    first_integer(tail)
}

fn first_integer(text: &str) -> i64 {
    let digits: String = text
        .chars()
        .skip_while(|ch| !ch.is_ascii_digit())
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    digits.parse::<i64>().unwrap_or(0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
