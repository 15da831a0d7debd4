//! Threshold-attack metrics and bootstrap confidence intervals.
//!
//! Scores are "higher means member". Every metric here is a pure function of
//! the two score lists, so a stored report can recompute them exactly.

use std::cmp::Ordering;

use rand::Rng;
use serde::{Deserialize, Serialize};

use molmia_core::{MiaError, Result, SeedKey};

/// Receiver operating characteristic of a threshold attack.
#[derive(Clone, Debug, PartialEq)]
pub struct RocCurve {
    /// Thresholds, descending; the first is `+inf` (flag nothing).
    pub thresholds: Vec<f64>,
    /// False-positive rate when flagging scores `>= threshold`.
    pub fpr: Vec<f64>,
    /// True-positive rate when flagging scores `>= threshold`.
    pub tpr: Vec<f64>,
}

/// ROC curve over every distinct score.
pub fn roc_curve(members: &[f64], non_members: &[f64]) -> RocCurve {
    let n_pos = members.len().max(1) as f64;
    let n_neg = non_members.len().max(1) as f64;
    let mut all: Vec<(f64, bool)> = members
        .iter()
        .map(|&s| (s, true))
        .chain(non_members.iter().map(|&s| (s, false)))
        .collect();
    all.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut curve = RocCurve {
        thresholds: vec![f64::INFINITY],
        fpr: vec![0.0],
        tpr: vec![0.0],
    };
    let (mut tp, mut fp) = (0usize, 0usize);
    let mut i = 0;
    while i < all.len() {
        let t = all[i].0;
        while i < all.len() && all[i].0.total_cmp(&t) == Ordering::Equal {
            if all[i].1 {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        curve.thresholds.push(t);
        curve.fpr.push(fp as f64 / n_neg);
        curve.tpr.push(tp as f64 / n_pos);
    }
    curve
}

/// Area under the ROC curve: the probability that a random member outscores
/// a random non-member, ties counting one half.
pub fn auc(members: &[f64], non_members: &[f64]) -> f64 {
    if members.is_empty() || non_members.is_empty() {
        return 0.5;
    }
    let mut sorted = non_members.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mut u = 0.0;
    for &m in members {
        let below = sorted.partition_point(|&n| n.total_cmp(&m) == Ordering::Less);
        let not_above = sorted.partition_point(|&n| n.total_cmp(&m) != Ordering::Greater);
        u += below as f64 + 0.5 * (not_above - below) as f64;
    }
    u / (members.len() as f64 * non_members.len() as f64)
}

/// Largest TPR achievable with FPR at most `fpr`.
pub fn tpr_at_fpr(curve: &RocCurve, fpr: f64) -> f64 {
    curve
        .fpr
        .iter()
        .zip(&curve.tpr)
        .filter(|(f, _)| **f <= fpr + 1e-12)
        .map(|(_, &t)| t)
        .fold(0.0, f64::max)
}

/// Maximum membership advantage, `max(TPR - FPR)` over thresholds.
pub fn max_advantage(curve: &RocCurve) -> f64 {
    curve
        .fpr
        .iter()
        .zip(&curve.tpr)
        .map(|(f, t)| t - f)
        .fold(0.0, f64::max)
}

/// Empirical epsilon lower bound implied by one `(TPR, FPR)` pair.
///
/// Ratios with a zero denominator are skipped, so the result is always finite.
pub fn epsilon_lower_bound(tpr: f64, fpr: f64) -> f64 {
    let mut eps: f64 = 0.0;
    if tpr > 0.0 && fpr > 0.0 {
        eps = eps.max((tpr / fpr).ln());
    }
    if tpr < 1.0 && fpr < 1.0 {
        eps = eps.max(((1.0 - fpr) / (1.0 - tpr)).ln());
    }
    eps
}

/// Parameters controlling bootstrap estimates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BootstrapParams {
    /// Number of bootstrap resamples.
    pub num_samples: usize,
    /// Confidence level of the reported intervals.
    pub confidence: f64,
    /// Key the resampling stream is derived from.
    pub seed: SeedKey,
}

impl BootstrapParams {
    /// Create validated bootstrap parameters.
    pub fn new(num_samples: usize, confidence: f64, seed: SeedKey) -> Result<Self> {
        let params = Self {
            num_samples,
            confidence,
            seed,
        };
        params.validate()?;
        Ok(params)
    }

    /// Validate the parameters.
    pub fn validate(&self) -> Result<()> {
        if self.num_samples == 0 {
            return Err(MiaError::invalid("num_samples must be positive"));
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(MiaError::invalid("confidence must be in (0, 1)"));
        }
        Ok(())
    }

    /// Lower and upper percentile of the interval.
    pub fn quantiles(&self) -> [f64; 2] {
        let alpha = 1.0 - self.confidence;
        [alpha / 2.0, 1.0 - alpha / 2.0]
    }
}

/// A point estimate with a bootstrap percentile interval.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    /// Estimate on the full data.
    pub estimate: f64,
    /// Lower interval bound.
    pub lower: f64,
    /// Upper interval bound.
    pub upper: f64,
}

impl Interval {
    /// Whether `value` lies within the interval bounds.
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// Metrics at one false-positive-rate operating point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperatingPoint {
    /// Target false-positive rate.
    pub fpr: f64,
    /// True-positive rate at that false-positive rate.
    pub tpr: Interval,
    /// Epsilon lower bound implied by the point estimates.
    pub epsilon_lower: f64,
}

/// Aggregate privacy-risk metrics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttackMetrics {
    /// Number of target-train examples.
    pub n_members: usize,
    /// Number of target-holdout examples.
    pub n_non_members: usize,
    /// Area under the ROC curve.
    pub auc: Interval,
    /// Maximum membership advantage.
    pub advantage: Interval,
    /// TPR at each requested FPR.
    pub operating_points: Vec<OperatingPoint>,
    /// Bootstrap parameters the intervals were computed with.
    pub bootstrap: BootstrapParams,
}

impl AttackMetrics {
    /// Compute all metrics with bootstrap intervals.
    ///
    /// Members and non-members are resampled separately so every resample
    /// keeps the original class sizes.
    pub fn compute(
        members: &[f64],
        non_members: &[f64],
        fpr_points: &[f64],
        params: &BootstrapParams,
    ) -> Result<Self> {
        params.validate()?;
        check_scores(members, non_members)?;
        if let Some(&bad) = fpr_points.iter().find(|f| !(0.0..=1.0).contains(*f)) {
            return Err(MiaError::invalid(format!("fpr operating point {bad} outside [0, 1]")));
        }

        let full = Summary::of(members, non_members, fpr_points);
        let mut rng = params.seed.to_rng();
        let mut samples = Vec::with_capacity(params.num_samples);
        let mut m_buf = Vec::with_capacity(members.len());
        let mut n_buf = Vec::with_capacity(non_members.len());
        for _ in 0..params.num_samples {
            resample_into(&mut rng, members, &mut m_buf);
            resample_into(&mut rng, non_members, &mut n_buf);
            samples.push(Summary::of(&m_buf, &n_buf, fpr_points));
        }

        let qs = params.quantiles();
        let interval = |estimate: f64, pick: &dyn Fn(&Summary) -> f64| {
            let mut values: Vec<f64> = samples.iter().map(pick).collect();
            let [lower, upper] = quantiles(&mut values, qs);
            Interval {
                estimate,
                lower,
                upper,
            }
        };

        let operating_points = fpr_points
            .iter()
            .enumerate()
            .map(|(k, &fpr)| OperatingPoint {
                fpr,
                tpr: interval(full.tpr[k], &|s| s.tpr[k]),
                epsilon_lower: epsilon_lower_bound(full.tpr[k], fpr),
            })
            .collect();
        Ok(Self {
            n_members: members.len(),
            n_non_members: non_members.len(),
            auc: interval(full.auc, &|s| s.auc),
            advantage: interval(full.advantage, &|s| s.advantage),
            operating_points,
            bootstrap: params.clone(),
        })
    }
}

/// Fail with `DegenerateReport` when no threshold attack is defined.
pub fn check_scores(members: &[f64], non_members: &[f64]) -> Result<()> {
    if members.is_empty() {
        return Err(MiaError::degenerate("no target-train examples to score"));
    }
    if non_members.is_empty() {
        return Err(MiaError::degenerate("no target-holdout examples to score"));
    }
    if let Some(s) = members.iter().chain(non_members).find(|s| s.is_nan()) {
        return Err(MiaError::degenerate(format!("score {s} is not a number")));
    }
    let first = members[0];
    if members.iter().chain(non_members).all(|&s| s == first) {
        return Err(MiaError::degenerate(format!(
            "all {} scores equal {first}; ROC is undefined",
            members.len() + non_members.len()
        )));
    }
    Ok(())
}

struct Summary {
    auc: f64,
    advantage: f64,
    tpr: Vec<f64>,
}

impl Summary {
    fn of(members: &[f64], non_members: &[f64], fpr_points: &[f64]) -> Self {
        let curve = roc_curve(members, non_members);
        Self {
            auc: auc(members, non_members),
            advantage: max_advantage(&curve),
            tpr: fpr_points.iter().map(|&f| tpr_at_fpr(&curve, f)).collect(),
        }
    }
}

fn resample_into(rng: &mut impl Rng, scores: &[f64], out: &mut Vec<f64>) {
    out.clear();
    if scores.is_empty() {
        return;
    }
    for _ in 0..scores.len() {
        out.push(scores[rng.gen_range(0..scores.len())]);
    }
}

/// Linearly interpolated quantiles.
fn quantiles<const N: usize>(values: &mut [f64], qs: [f64; N]) -> [f64; N] {
    values.sort_by(f64::total_cmp);
    if values.is_empty() {
        return [f64::NAN; N];
    }
    qs.map(|q| {
        let idx = q.clamp(0.0, 1.0) * (values.len() - 1) as f64;
        let lo = idx.floor() as usize;
        let hi = idx.ceil() as usize;
        let w = idx - lo as f64;
        values[lo] * (1.0 - w) + values[hi] * w
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    fn params(n: usize) -> BootstrapParams {
        BootstrapParams::new(n, 0.95, SeedKey::new(3)).unwrap()
    }

    #[test]
    fn perfect_separation() {
        let members = [3.0, 4.0, 5.0];
        let non_members = [0.0, 1.0, 2.0];
        assert_eq!(auc(&members, &non_members), 1.0);
        let curve = roc_curve(&members, &non_members);
        assert_eq!(tpr_at_fpr(&curve, 0.0), 1.0);
        assert_eq!(max_advantage(&curve), 1.0);
    }

    #[test]
    fn ties_count_half() {
        assert_eq!(auc(&[1.0, 1.0], &[1.0, 1.0]), 0.5);
        assert_eq!(auc(&[2.0, 1.0], &[1.0]), 0.75);
    }

    #[test]
    fn roc_starts_at_origin_and_ends_at_one() {
        let curve = roc_curve(&[0.9, 0.4, 0.4], &[0.5, 0.1]);
        assert_eq!(curve.thresholds[0], f64::INFINITY);
        assert_eq!((curve.fpr[0], curve.tpr[0]), (0.0, 0.0));
        assert_eq!(*curve.fpr.last().unwrap(), 1.0);
        assert_eq!(*curve.tpr.last().unwrap(), 1.0);
        assert!(curve.thresholds.windows(2).all(|w| w[0] > w[1]));
        // Thresholds 0.9, 0.5, 0.4, 0.1 after the origin.
        assert_eq!(curve.thresholds.len(), 5);
        assert_eq!(tpr_at_fpr(&curve, 0.0), 1.0 / 3.0);
        assert_eq!(tpr_at_fpr(&curve, 0.5), 1.0);
    }

    #[test]
    fn epsilon_bound_is_finite() {
        assert_eq!(epsilon_lower_bound(0.0, 0.0), 0.0);
        assert!((epsilon_lower_bound(0.5, 0.1) - 5f64.ln()).abs() < 1e-12);
        assert!(epsilon_lower_bound(1.0, 0.0).is_finite());
        assert!((epsilon_lower_bound(0.9, 0.5) - 5f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn degenerate_inputs() {
        assert!(matches!(
            check_scores(&[], &[1.0]),
            Err(MiaError::DegenerateReport { .. })
        ));
        assert!(matches!(
            check_scores(&[1.0], &[]),
            Err(MiaError::DegenerateReport { .. })
        ));
        assert!(matches!(
            check_scores(&[2.0, 2.0], &[2.0]),
            Err(MiaError::DegenerateReport { .. })
        ));
        assert!(check_scores(&[2.0, 2.0], &[1.0]).is_ok());
    }

    #[test]
    fn bootstrap_is_seeded() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let members: Vec<f64> = (0..200).map(|_| normal.sample(&mut rng) + 0.5).collect();
        let non_members: Vec<f64> = (0..200).map(|_| normal.sample(&mut rng)).collect();
        let a = AttackMetrics::compute(&members, &non_members, &[0.01, 0.1], &params(200)).unwrap();
        let b = AttackMetrics::compute(&members, &non_members, &[0.01, 0.1], &params(200)).unwrap();
        assert_eq!(a, b);
        assert!(a.auc.lower <= a.auc.estimate && a.auc.estimate <= a.auc.upper);
        assert!(a.auc.estimate > 0.55);
        assert_eq!(a.operating_points.len(), 2);

        let other = BootstrapParams::new(200, 0.95, SeedKey::new(4)).unwrap();
        let c = AttackMetrics::compute(&members, &non_members, &[0.01, 0.1], &other).unwrap();
        assert_eq!(a.auc.estimate, c.auc.estimate);
        assert_ne!(a.auc.lower, c.auc.lower);
    }

    #[test]
    fn quantiles_interpolate() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(quantiles(&mut values, [0.0, 0.5, 1.0]), [1.0, 3.0, 5.0]);
        assert_eq!(quantiles(&mut values, [0.125]), [1.5]);
    }

    #[test]
    fn invalid_params_rejected() {
        assert!(BootstrapParams::new(0, 0.9, SeedKey::new(0)).is_err());
        assert!(BootstrapParams::new(10, 1.0, SeedKey::new(0)).is_err());
        let err = AttackMetrics::compute(&[1.0], &[0.0], &[1.5], &params(10)).unwrap_err();
        assert!(matches!(err, MiaError::InvalidParameters { .. }));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn auc_is_a_probability_and_swaps(
            members in prop::collection::vec(-5i32..5, 1..30),
            non_members in prop::collection::vec(-5i32..5, 1..30),
        ) {
            let m: Vec<f64> = members.iter().map(|&v| v as f64).collect();
            let n: Vec<f64> = non_members.iter().map(|&v| v as f64).collect();
            let a = auc(&m, &n);
            prop_assert!((0.0..=1.0).contains(&a));
            prop_assert!((a + auc(&n, &m) - 1.0).abs() < 1e-12);

            // Trapezoidal area under the ROC curve agrees with the rank statistic.
            let curve = roc_curve(&m, &n);
            let area: f64 = (1..curve.fpr.len())
                .map(|i| 0.5 * (curve.tpr[i] + curve.tpr[i - 1]) * (curve.fpr[i] - curve.fpr[i - 1]))
                .sum();
            prop_assert!((area - a).abs() < 1e-9);
        }
    }
}
