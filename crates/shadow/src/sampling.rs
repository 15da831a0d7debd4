//! Random inclusion subsets for shadow runs.

use rand::Rng;

/// Select candidates independently with probability `q`.
///
/// Returns the selected candidates in their input order.
pub fn poisson_subset<R: Rng + ?Sized>(candidates: &[usize], q: f64, rng: &mut R) -> Vec<usize> {
    if candidates.is_empty() || !q.is_finite() || q <= 0.0 {
        return Vec::new();
    }
    let q = q.clamp(0.0, 1.0);
    candidates
        .iter()
        .copied()
        .filter(|_| rng.gen_bool(q))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn inclusion_rate_matches_probability() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let candidates: Vec<usize> = (0..10_000).collect();
        let picked = poisson_subset(&candidates, 0.3, &mut rng);
        let ratio = picked.len() as f64 / candidates.len() as f64;
        assert!((ratio - 0.3).abs() < 0.02);
        assert!(picked.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn degenerate_probabilities() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let candidates = [3, 5, 8];
        assert!(poisson_subset(&candidates, 0.0, &mut rng).is_empty());
        assert!(poisson_subset(&candidates, f64::NAN, &mut rng).is_empty());
        assert_eq!(poisson_subset(&candidates, 1.0, &mut rng), vec![3, 5, 8]);
    }
}
