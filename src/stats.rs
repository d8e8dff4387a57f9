//! Statistical primitives for drift, decay, and experiment evaluation.
//!
//! Provides the two-sample Kolmogorov-Smirnov statistic used for drift
//! detection, the 2×2 chi-square independence test used for A/B
//! significance, and classification metrics over labeled predictions.

use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Arithmetic mean. Empty input yields 0.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation. Fewer than two values yields 0.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Two-sample Kolmogorov-Smirnov statistic: the maximum distance between
/// the empirical CDFs of the two samples. Returns 0 if either sample is
/// empty.
pub fn ks_statistic(sample_a: &[f64], sample_b: &[f64]) -> f64 {
    if sample_a.is_empty() || sample_b.is_empty() {
        return 0.0;
    }

    let mut a = sample_a.to_vec();
    let mut b = sample_b.to_vec();
    a.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));
    b.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));

    let (na, nb) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0usize, 0usize);
    let mut max_distance: f64 = 0.0;

    while i < a.len() && j < b.len() {
        if a[i] <= b[j] {
            i += 1;
        } else {
            j += 1;
        }
        let cdf_a = i as f64 / na;
        let cdf_b = j as f64 / nb;
        max_distance = max_distance.max((cdf_a - cdf_b).abs());
    }

    max_distance
}

/// Result of a chi-square independence test over a 2×2 contingency table.
#[derive(Debug, Clone, Copy)]
pub struct ChiSquareResult {
    /// The chi-square test statistic (one degree of freedom).
    pub statistic: f64,
    /// Probability of a statistic at least this large under independence.
    pub p_value: f64,
}

/// Chi-square independence test on per-arm (correct, incorrect) counts.
///
/// Degenerate tables (an empty arm, or all-correct/all-incorrect overall)
/// carry no evidence of a difference and report statistic 0, p-value 1.
pub fn chi_square_2x2(
    correct_a: u64,
    total_a: u64,
    correct_b: u64,
    total_b: u64,
) -> ChiSquareResult {
    let incorrect_a = total_a.saturating_sub(correct_a);
    let incorrect_b = total_b.saturating_sub(correct_b);

    let n = (total_a + total_b) as f64;
    let row_correct = (correct_a + correct_b) as f64;
    let row_incorrect = (incorrect_a + incorrect_b) as f64;

    if total_a == 0 || total_b == 0 || row_correct == 0.0 || row_incorrect == 0.0 {
        return ChiSquareResult {
            statistic: 0.0,
            p_value: 1.0,
        };
    }

    let observed = [
        (correct_a as f64, row_correct * total_a as f64 / n),
        (incorrect_a as f64, row_incorrect * total_a as f64 / n),
        (correct_b as f64, row_correct * total_b as f64 / n),
        (incorrect_b as f64, row_incorrect * total_b as f64 / n),
    ];

    let statistic: f64 = observed
        .iter()
        .map(|(obs, exp)| (obs - exp).powi(2) / exp)
        .sum();

    // One degree of freedom for a 2x2 table.
    let p_value = match ChiSquared::new(1.0) {
        Ok(dist) => 1.0 - dist.cdf(statistic),
        Err(_) => 1.0,
    };

    ChiSquareResult { statistic, p_value }
}

/// Classification metrics over (prediction, ground truth) pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub sample_count: usize,
}

/// Compute accuracy/precision/recall/F1 from labeled pairs, binarizing
/// both sides at 0.5.
pub fn classification_metrics(pairs: &[(f64, f64)]) -> ClassificationMetrics {
    if pairs.is_empty() {
        return ClassificationMetrics::default();
    }

    let (mut tp, mut tn, mut fp, mut fn_) = (0u64, 0u64, 0u64, 0u64);
    for (prediction, truth) in pairs {
        let p = *prediction >= 0.5;
        let t = *truth >= 0.5;
        match (p, t) {
            (true, true) => tp += 1,
            (false, false) => tn += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
        }
    }

    let total = pairs.len() as f64;
    let accuracy = (tp + tn) as f64 / total;
    let precision = if tp + fp > 0 {
        tp as f64 / (tp + fp) as f64
    } else {
        0.0
    };
    let recall = if tp + fn_ > 0 {
        tp as f64 / (tp + fn_) as f64
    } else {
        0.0
    };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    ClassificationMetrics {
        accuracy,
        precision,
        recall,
        f1,
        sample_count: pairs.len(),
    }
}
