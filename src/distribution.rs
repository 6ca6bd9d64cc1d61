//! Discrete probability distributions over a sorted integer support.
//!
//! The central type is [`Distribution`]: an immutable distribution over a
//! strictly increasing support, carrying its pmf plus two cached prefix-sum
//! tables (the cmf and the expectation prefix Σ x·p). The prefix tables make
//! [`Distribution::capped_expectation`] an O(log n) query, which is the
//! primitive every expected-value recurrence in [`crate::engine`] bottoms out
//! in.
//!
//! Validation happens once at construction; a [`Distribution`] that exists is
//! always well-formed.

use rand::Rng;
use thiserror::Error;

/// Permissible distance of a pmf sum (or cmf tail) from 1.
pub const MASS_TOLERANCE: f64 = 1e-3;

/// Construction-time validation failures. Fatal: a distribution that fails to
/// construct must not be used partially.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DistributionError {
    #[error("support must be non-empty")]
    EmptySupport,
    #[error("support must be strictly increasing")]
    UnsortedSupport,
    #[error("support has {support} values but {probs} probabilities")]
    LengthMismatch { support: usize, probs: usize },
    #[error("probabilities must be non-negative")]
    NegativeMass,
    #[error("pmf sums to {sum}, expected 1 within {MASS_TOLERANCE}")]
    NotNormalized { sum: f64 },
    #[error("cmf must start at 0, be nondecreasing, and end at 1")]
    InvalidCmf,
}

/// Returns the prefix sums of `l`, with a leading 0 (length `l.len() + 1`).
pub(crate) fn prefix_sum(l: &[f64]) -> Vec<f64> {
    let mut prefix = vec![0.0; l.len() + 1];
    for (i, &x) in l.iter().enumerate() {
        prefix[i + 1] = prefix[i] + x;
    }
    prefix
}

/// An immutable discrete distribution over a strictly increasing `i64` support.
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    support: Vec<i64>,
    pmf: Vec<f64>,
    /// Prefix-sum cmf: `cmf[i]` = P(X ≤ support[i-1]), `cmf[0]` = 0.
    cmf: Vec<f64>,
    /// Prefix sums of x·p, for O(log n) capped-expectation suffix queries.
    ev: Vec<f64>,
}

impl Distribution {
    /// Builds a distribution from a support and its pmf.
    pub fn from_pmf(support: Vec<i64>, pmf: Vec<f64>) -> Result<Self, DistributionError> {
        Self::check_support(&support, pmf.len())?;
        if pmf.iter().any(|&p| p < 0.0 || !p.is_finite()) {
            return Err(DistributionError::NegativeMass);
        }
        let sum: f64 = pmf.iter().sum();
        if (sum - 1.0).abs() >= MASS_TOLERANCE {
            return Err(DistributionError::NotNormalized { sum });
        }
        let cmf = prefix_sum(&pmf);
        Ok(Self::from_tables(support, pmf, cmf))
    }

    /// Builds a distribution from a support and a prefix-form cmf
    /// (`support.len() + 1` entries, starting at 0 and ending at 1).
    /// The pmf is recovered by differencing.
    pub fn from_cmf(support: Vec<i64>, cmf: Vec<f64>) -> Result<Self, DistributionError> {
        Self::check_support(&support, cmf.len().saturating_sub(1))?;
        let valid = cmf.first() == Some(&0.0)
            && cmf.windows(2).all(|w| w[1] >= w[0])
            && cmf.iter().all(|c| c.is_finite())
            && (cmf[cmf.len() - 1] - 1.0).abs() < MASS_TOLERANCE;
        if !valid {
            return Err(DistributionError::InvalidCmf);
        }
        let pmf: Vec<f64> = cmf.windows(2).map(|w| w[1] - w[0]).collect();
        Ok(Self::from_tables(support, pmf, cmf))
    }

    /// Builds a distribution from non-negative weights, normalizing them into
    /// a pmf first. Used by empirical-histogram comparisons.
    pub fn from_weights(support: Vec<i64>, weights: Vec<f64>) -> Result<Self, DistributionError> {
        if weights.iter().any(|&w| w < 0.0 || !w.is_finite()) {
            return Err(DistributionError::NegativeMass);
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(DistributionError::NotNormalized { sum: total });
        }
        let pmf = weights.into_iter().map(|w| w / total).collect();
        Self::from_pmf(support, pmf)
    }

    fn check_support(support: &[i64], probs: usize) -> Result<(), DistributionError> {
        if support.is_empty() {
            return Err(DistributionError::EmptySupport);
        }
        if support.len() != probs {
            return Err(DistributionError::LengthMismatch {
                support: support.len(),
                probs,
            });
        }
        if support.windows(2).any(|w| w[1] <= w[0]) {
            return Err(DistributionError::UnsortedSupport);
        }
        Ok(())
    }

    /// Internal constructor for tables already known to be consistent
    /// (powered cmfs, differenced pmfs).
    pub(crate) fn from_tables(support: Vec<i64>, pmf: Vec<f64>, cmf: Vec<f64>) -> Self {
        debug_assert_eq!(cmf.len(), support.len() + 1);
        let xp: Vec<f64> = support
            .iter()
            .zip(&pmf)
            .map(|(&x, &p)| x as f64 * p)
            .collect();
        let ev = prefix_sum(&xp);
        Self {
            support,
            pmf,
            cmf,
            ev,
        }
    }

    pub fn len(&self) -> usize {
        self.support.len()
    }

    pub fn is_empty(&self) -> bool {
        false // construction rejects empty supports
    }

    pub fn support(&self) -> &[i64] {
        &self.support
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.pmf
    }

    pub fn min_value(&self) -> i64 {
        self.support[0]
    }

    pub fn max_value(&self) -> i64 {
        self.support[self.support.len() - 1]
    }

    /// Position of `x` in the support, if present.
    pub fn index_of(&self, x: i64) -> Option<usize> {
        self.support.binary_search(&x).ok()
    }

    /// Probability mass at `x`; 0 off-support.
    pub fn pmf(&self, x: i64) -> f64 {
        self.index_of(x).map_or(0.0, |i| self.pmf[i])
    }

    /// P(X ≤ x). Off-support values resolve via binary search, so arbitrary
    /// thresholds can be queried, not just support points.
    pub fn cmf(&self, x: i64) -> f64 {
        self.cmf_at(x as f64)
    }

    /// P(X ≤ u) for a real-valued threshold.
    pub fn cmf_at(&self, u: f64) -> f64 {
        let i = self.support.partition_point(|&x| (x as f64) <= u);
        self.cmf[i]
    }

    /// Σ x·p(x).
    pub fn expectation(&self) -> f64 {
        self.ev[self.len()]
    }

    /// Σ f(x)·p(x).
    pub fn expectation_by(&self, f: impl Fn(i64) -> f64) -> f64 {
        self.support
            .iter()
            .zip(&self.pmf)
            .map(|(&x, &p)| f(x) * p)
            .sum()
    }

    /// Var[X] = E[X²] − E[X]².
    pub fn variance(&self) -> f64 {
        let mean = self.expectation();
        self.expectation_by(|x| (x * x) as f64) - mean * mean
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Maximum support value minus the minimum.
    pub fn range(&self) -> i64 {
        self.max_value() - self.min_value()
    }

    /// E[max(X, u)] in O(log n): `u·F(u)` plus the suffix of the expectation
    /// prefix past u's insertion point.
    ///
    /// Thresholds below the whole support (including −∞, the fresh-session
    /// best) reduce to the plain expectation.
    pub fn capped_expectation(&self, u: f64) -> f64 {
        let n = self.len();
        let i = self.support.partition_point(|&x| (x as f64) <= u);
        if i == 0 {
            return self.ev[n];
        }
        u * self.cmf[i] + (self.ev[n] - self.ev[i])
    }

    /// New distribution transformed by `f`; collapsed values merge their mass
    /// and the image support is re-sorted.
    pub fn transform(&self, f: impl Fn(i64) -> i64) -> Result<Self, DistributionError> {
        let mut merged: std::collections::BTreeMap<i64, f64> = std::collections::BTreeMap::new();
        for (&x, &p) in self.support.iter().zip(&self.pmf) {
            *merged.entry(f(x)).or_insert(0.0) += p;
        }
        let (support, pmf) = merged.into_iter().unzip();
        Self::from_pmf(support, pmf)
    }

    /// New distribution over the same support with probabilities given by `f`
    /// applied to each support value. The result must still be a valid pmf.
    pub fn map(&self, f: impl Fn(i64) -> f64) -> Result<Self, DistributionError> {
        let pmf = self.support.iter().map(|&x| f(x)).collect();
        Self::from_pmf(self.support.clone(), pmf)
    }

    /// Distribution of the maximum of `b` i.i.d. draws: the cmf raised to the
    /// b-th power pointwise, same support, pmf recovered by differencing.
    pub fn batch_max(&self, b: u32) -> Self {
        debug_assert!(b >= 1, "batch size must be at least 1");
        let cmf: Vec<f64> = self.cmf.iter().map(|&c| c.powi(b as i32)).collect();
        let pmf: Vec<f64> = cmf.windows(2).map(|w| w[1] - w[0]).collect();
        Self::from_tables(self.support.clone(), pmf, cmf)
    }

    /// Batch-max pmf at `x` for an arbitrary batch size, without
    /// materializing the derived distribution. `b = 0` carries no mass.
    pub fn batch_max_pmf(&self, b: u32, x: i64) -> f64 {
        match self.index_of(x) {
            Some(i) if b >= 1 => self.cmf[i + 1].powi(b as i32) - self.cmf[i].powi(b as i32),
            _ => 0.0,
        }
    }

    /// Draws one value by inverse-cmf lookup against a uniform draw.
    pub fn sample(&self, rng: &mut impl Rng) -> i64 {
        let p = rng.random::<f64>();
        let i = self.cmf.partition_point(|&c| c <= p);
        self.support[(i - 1).min(self.len() - 1)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn canonical() -> Distribution {
        Distribution::from_pmf(
            vec![1, 5, 10, 15, 16, 20, 30, 35, 50, 100],
            vec![0.05, 0.08, 0.10, 0.12, 0.17, 0.22, 0.10, 0.10, 0.05, 0.01],
        )
        .unwrap()
    }

    #[test]
    fn rejects_unsorted_support() {
        let err = Distribution::from_pmf(vec![2, 1], vec![0.5, 0.5]).unwrap_err();
        assert_eq!(err, DistributionError::UnsortedSupport);
    }

    #[test]
    fn rejects_duplicate_support() {
        let err = Distribution::from_pmf(vec![1, 1], vec![0.5, 0.5]).unwrap_err();
        assert_eq!(err, DistributionError::UnsortedSupport);
    }

    #[test]
    fn rejects_bad_mass() {
        assert!(matches!(
            Distribution::from_pmf(vec![1, 2], vec![0.5, 0.6]),
            Err(DistributionError::NotNormalized { .. })
        ));
        assert_eq!(
            Distribution::from_pmf(vec![1, 2], vec![-0.1, 1.1]).unwrap_err(),
            DistributionError::NegativeMass
        );
    }

    #[test]
    fn rejects_bad_cmf() {
        // not starting at zero
        assert!(Distribution::from_cmf(vec![1, 2], vec![0.1, 0.5, 1.0]).is_err());
        // decreasing
        assert!(Distribution::from_cmf(vec![1, 2], vec![0.0, 0.9, 0.8]).is_err());
        // not ending at one
        assert!(Distribution::from_cmf(vec![1, 2], vec![0.0, 0.4, 0.9]).is_err());
    }

    #[test]
    fn cmf_round_trips_pmf() {
        let d = canonical();
        let via_cmf = Distribution::from_cmf(d.support().to_vec(), d.cmf.clone()).unwrap();
        for (&a, &b) in d.probabilities().iter().zip(via_cmf.probabilities()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn off_support_queries() {
        let d = canonical();
        assert_eq!(d.pmf(7), 0.0);
        assert!((d.cmf(7) - 0.13).abs() < 1e-12); // mass at 1 and 5
        assert!((d.cmf(0) - 0.0).abs() < 1e-12);
        assert!((d.cmf(1000) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn capped_expectation_matches_naive() {
        let d = canonical();
        for u in [-5.0, 0.0, 9.5, 16.0, 33.3, 99.0, 250.0] {
            let naive = d.expectation_by(|x| (x as f64).max(u));
            assert!((d.capped_expectation(u) - naive).abs() < 1e-9, "u={u}");
        }
    }

    #[test]
    fn capped_expectation_handles_neg_infinity() {
        let d = canonical();
        let e = d.capped_expectation(f64::NEG_INFINITY);
        assert!((e - d.expectation()).abs() < 1e-12);
    }

    #[test]
    fn canonical_moments() {
        let d = canonical();
        // E[X] = .05 + .4 + 1 + 1.8 + 2.72 + 4.4 + 3 + 3.5 + 2.5 + 1
        assert!((d.expectation() - 20.37).abs() < 1e-9);
        assert_eq!(d.range(), 99);
    }

    #[test]
    fn transform_merges_collapsed_values() {
        let d = Distribution::from_pmf(vec![-2, -1, 1, 2, 3], vec![0.1, 0.2, 0.5, 0.1, 0.1])
            .unwrap();
        let sq = d.transform(|x| x * x).unwrap();
        assert_eq!(sq.support(), &[1, 4, 9]);
        assert!((sq.pmf(1) - 0.7).abs() < 1e-12);
        assert!((sq.pmf(4) - 0.2).abs() < 1e-12);
        assert!((sq.pmf(9) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn batch_max_of_one_is_identity() {
        let d = canonical();
        let z1 = d.batch_max(1);
        for (&a, &b) in d.probabilities().iter().zip(z1.probabilities()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn batch_max_pmf_agrees_with_materialized() {
        let d = canonical();
        let z = d.batch_max(10);
        for &x in d.support() {
            assert!((z.pmf(x) - d.batch_max_pmf(10, x)).abs() < 1e-12);
        }
        assert_eq!(d.batch_max_pmf(0, 16), 0.0);
    }

    #[test]
    fn sampling_stays_on_support() {
        let d = canonical();
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..1000 {
            assert!(d.index_of(d.sample(&mut rng)).is_some());
        }
    }
}
