//! Statistical analysis for experiment results
//!
//! Implements a two-proportion Z-test between the control variant and the
//! best-performing variant, plus the per-variant aggregation that feeds it.

use crate::model::{
    EventType, ExperimentAssignment, ExperimentEvent, ExperimentResults, RecommendedAction,
    Variant, VariantMetrics,
};
use crate::engine::bucketing::ordered_variants;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Result of comparing two conversion proportions
#[derive(Debug, Clone, PartialEq)]
pub struct ZTestResult {
    pub z_score: f64,
    /// Two-tailed p-value
    pub p_value: f64,
    pub is_significant: bool,
}

/// Critical Z value for a confidence level
///
/// 2.576 at 0.99 and above, 1.96 at 0.95 and above, 1.645 otherwise.
pub fn z_critical(confidence_level: f64) -> f64 {
    if confidence_level >= 0.99 {
        2.576
    } else if confidence_level >= 0.95 {
        1.96
    } else {
        1.645
    }
}

/// Two-proportion Z-test with pooled standard error
///
/// # Arguments
/// * `p1`, `n1` - Conversion rate and sample size of the control
/// * `p2`, `n2` - Conversion rate and sample size of the challenger
/// * `confidence_level` - Required confidence (e.g., 0.95)
///
/// # Returns
/// `None` when either sample is empty or the pooled proportion is 0 or 1,
/// where the standard error is undefined.
pub fn two_proportion_z_test(
    p1: f64,
    n1: u64,
    p2: f64,
    n2: u64,
    confidence_level: f64,
) -> Option<ZTestResult> {
    if n1 == 0 || n2 == 0 {
        return None;
    }

    let (n1, n2) = (n1 as f64, n2 as f64);
    let pooled = (p1 * n1 + p2 * n2) / (n1 + n2);
    if pooled <= 0.0 || pooled >= 1.0 {
        return None;
    }

    let se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
    if se == 0.0 || !se.is_finite() {
        return None;
    }

    let z_score = (p2 - p1).abs() / se;
    let p_value = 2.0 * (1.0 - normal_cdf(z_score));

    Some(ZTestResult {
        z_score,
        p_value,
        is_significant: z_score > z_critical(confidence_level),
    })
}

/// Turn per-variant metrics into a verdict
///
/// Metrics are expected in walk order (control first). The control is the
/// variant flagged `is_control`, or the first one. The best variant has the
/// highest conversion rate, earliest wins on ties. When the control is
/// itself best, it is tested against the strongest challenger so a
/// significant result means "no improvement".
pub fn analyze(
    metrics: Vec<VariantMetrics>,
    min_sample_size: u64,
    confidence_level: f64,
) -> ExperimentResults {
    let mut results = ExperimentResults {
        confidence_level,
        ..Default::default()
    };

    if metrics.len() < 2 {
        results.variants = metrics;
        results.recommended_action = RecommendedAction::InsufficientVariants;
        return results;
    }

    results.can_conclude = metrics.iter().all(|m| m.sample_size >= min_sample_size);

    let control_idx = metrics.iter().position(|m| m.is_control).unwrap_or(0);
    let best_idx = best_index(metrics.iter().enumerate());
    let challenger_idx = if best_idx == control_idx {
        best_index(metrics.iter().enumerate().filter(|(i, _)| *i != control_idx))
    } else {
        best_idx
    };

    let control = &metrics[control_idx];
    let best = &metrics[best_idx];
    let challenger = &metrics[challenger_idx];

    results.control_variant = Some(control.variant_key.clone());
    results.best_variant = Some(best.variant_key.clone());

    if control.conversion_rate > 0.0 {
        results.uplift = Some(
            (best.conversion_rate - control.conversion_rate) / control.conversion_rate * 100.0,
        );
    }

    if let Some(test) = two_proportion_z_test(
        control.conversion_rate,
        control.sample_size,
        challenger.conversion_rate,
        challenger.sample_size,
        confidence_level,
    ) {
        results.is_significant = test.is_significant;
        results.p_value = Some(test.p_value);
        results.z_score = Some(test.z_score);
    }

    results.recommended_action = if !results.can_conclude {
        RecommendedAction::Continue
    } else if results.is_significant && best_idx != control_idx {
        results.winner = Some(best.variant_key.clone());
        RecommendedAction::ConcludeWinner
    } else if results.is_significant {
        RecommendedAction::ConcludeNoImprovement
    } else {
        RecommendedAction::Continue
    };

    results.variants = metrics;
    results
}

fn best_index<'a>(candidates: impl Iterator<Item = (usize, &'a VariantMetrics)>) -> usize {
    let mut best: Option<(usize, f64)> = None;
    for (i, m) in candidates {
        match best {
            Some((_, rate)) if m.conversion_rate <= rate => {}
            _ => best = Some((i, m.conversion_rate)),
        }
    }
    best.map(|(i, _)| i).unwrap_or(0)
}

/// Aggregate assignments and events into per-variant metrics
///
/// - `sample_size`: assignments to the variant
/// - `impressions`: impression events
/// - `conversions`: distinct subjects with a conversion event
/// - `total_value` / `average_value`: over events that carry a value
///
/// Output follows the variant walk order (control first, then by key).
pub fn fold_variant_metrics(
    variants: &[Variant],
    assignments: &[&ExperimentAssignment],
    events: &[&ExperimentEvent],
) -> Vec<VariantMetrics> {
    let mut sample_sizes: HashMap<Uuid, u64> = HashMap::new();
    for a in assignments {
        *sample_sizes.entry(a.variant_id).or_insert(0) += 1;
    }

    let mut impressions: HashMap<Uuid, u64> = HashMap::new();
    let mut converted: HashMap<Uuid, HashSet<&str>> = HashMap::new();
    let mut values: HashMap<Uuid, (f64, u64)> = HashMap::new();
    for e in events {
        match e.event_type {
            EventType::Impression => *impressions.entry(e.variant_id).or_insert(0) += 1,
            EventType::Conversion => {
                converted
                    .entry(e.variant_id)
                    .or_default()
                    .insert(e.subject_id.as_str());
            }
            _ => {}
        }
        if let Some(value) = e.value {
            let slot = values.entry(e.variant_id).or_insert((0.0, 0));
            slot.0 += value;
            slot.1 += 1;
        }
    }

    ordered_variants(variants)
        .into_iter()
        .map(|v| {
            let sample_size = sample_sizes.get(&v.id).copied().unwrap_or(0);
            let conversions = converted.get(&v.id).map_or(0, |s| s.len() as u64);
            let (total_value, valued) = values.get(&v.id).copied().unwrap_or((0.0, 0));
            VariantMetrics {
                variant_id: v.id,
                variant_key: v.key.clone(),
                is_control: v.is_control,
                sample_size,
                impressions: impressions.get(&v.id).copied().unwrap_or(0),
                conversions,
                conversion_rate: if sample_size > 0 {
                    conversions as f64 / sample_size as f64
                } else {
                    0.0
                },
                average_value: if valued > 0 {
                    total_value / valued as f64
                } else {
                    0.0
                },
                total_value,
            }
        })
        .collect()
}

/// Standard normal CDF via the Abramowitz and Stegun erf approximation
///
/// Accuracy: |error| < 7.5e-8
fn normal_cdf(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs() / std::f64::consts::SQRT_2;

    let t = 1.0 / (1.0 + P * x);
    let erf = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();

    0.5 * (1.0 + sign * erf)
}

#[cfg(test)]
#[path = "analysis_test.rs"]
mod tests;
