//! Probability engine: batch-max distribution family and the expected-value
//! recurrences over remaining-draw count.
//!
//! For a configuration (base distribution X, batch size B, horizon R) the
//! engine eagerly precomputes, once:
//!
//! | Table | Recurrence | Granularity |
//! |-------|------------|-------------|
//! | `Z_b`, b = 1..=B | `Fz_b(x) = F(x)^b` pointwise | — |
//! | `Ef(r)` | `Ef(r) = Z_n.capped(Ef(r−n))`, n = r mod B (or B) | mixed |
//! | `Er(r)` | `Er(r) = X.capped(Er(r−1))` | per draw |
//! | `Et(t)` | `Et(t) = Z_B.capped(Et(t−1))` | per batch |
//!
//! `Ef` is the optimal-stopping Bellman equation: the value of holding r
//! draws equals the expectation over the current batch's maximum, capped
//! below by the value of continuing with the remaining draws. The remainder
//! `R mod B` is absorbed by the **first** batch (leading-remainder
//! convention), so every decision boundary sits at a multiple of B and
//! `Ef(r)` only ever recurses onto multiples of B.
//!
//! Each recurrence level is a single O(log n) capped-expectation query, so the
//! whole `Ef` table costs O((R/B)·log n). All tables are immutable after
//! construction and safe to share (`Arc`) across sessions and threads;
//! queries past the precomputed horizon re-run the recurrence statelessly
//! instead of touching the shared tables.

use crate::config::ConfigError;
use crate::distribution::Distribution;

/// Largest multiple of `b` that is ≤ `r`.
pub fn round_down(r: usize, b: usize) -> usize {
    r - r % b
}

/// Smallest multiple of `b` that is ≥ `r`.
pub fn round_up(r: usize, b: usize) -> usize {
    r + (b - r % b) % b
}

/// Precomputed batch-max family and expected-value tables for one
/// configuration.
#[derive(Debug)]
pub struct ProbabilityEngine {
    base: Distribution,
    batch_size: usize,
    horizon: usize,
    /// `fz[b-1]` = distribution of the max of b i.i.d. draws, b = 1..=B.
    fz: Vec<Distribution>,
    /// `Ef(r)` for r = 0..=round_up(R, B) + B, covering every pricing query a
    /// session can make after a token extension.
    ef: Vec<f64>,
    /// Draw-granularity recursion over X, r = 0..=R.
    ev_draw: Vec<f64>,
    /// Batch-granularity recursion over Z_B, t = 0..=R/B batches.
    ev_batch: Vec<f64>,
}

impl ProbabilityEngine {
    pub fn new(
        base: Distribution,
        batch_size: usize,
        horizon: usize,
    ) -> Result<Self, ConfigError> {
        if batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if horizon == 0 {
            return Err(ConfigError::ZeroHorizon);
        }

        let fz: Vec<Distribution> = (1..=batch_size)
            .map(|b| base.batch_max(b as u32))
            .collect();

        let top = round_up(horizon, batch_size) + batch_size;
        let mut ef = vec![0.0; top + 1];
        for r in 1..=top {
            let n = Self::current_batch_len(r, batch_size);
            ef[r] = fz[n - 1].capped_expectation(ef[r - n]);
        }

        let mut ev_draw = vec![0.0; horizon + 1];
        for r in 1..=horizon {
            ev_draw[r] = base.capped_expectation(ev_draw[r - 1]);
        }

        let z_full = &fz[batch_size - 1];
        let mut ev_batch = vec![0.0; horizon / batch_size + 1];
        for t in 1..ev_batch.len() {
            ev_batch[t] = z_full.capped_expectation(ev_batch[t - 1]);
        }

        Ok(Self {
            base,
            batch_size,
            horizon,
            fz,
            ef,
            ev_draw,
            ev_batch,
        })
    }

    /// Size of the batch currently in progress at r draws remaining:
    /// `r mod B`, except a zero remainder means a full batch.
    fn current_batch_len(r: usize, b: usize) -> usize {
        match r % b {
            0 => b,
            n => n,
        }
    }

    pub fn base(&self) -> &Distribution {
        &self.base
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// The batch-max distribution Z_b for b in 1..=B.
    pub fn fz(&self, b: usize) -> &Distribution {
        debug_assert!(b >= 1 && b <= self.batch_size, "batch size {b} out of range");
        &self.fz[b - 1]
    }

    /// Optimal expected value with `r` draws remaining (mixed-granularity
    /// recurrence). Values past the precomputed table are derived by running
    /// the same recurrence forward from the table's edge, leaving the shared
    /// table untouched.
    pub fn ef(&self, r: usize) -> f64 {
        if r < self.ef.len() {
            return self.ef[r];
        }
        let mut chain = Vec::new();
        let mut cur = r;
        while cur >= self.ef.len() {
            let n = Self::current_batch_len(cur, self.batch_size);
            chain.push(n);
            cur -= n;
        }
        let mut val = self.ef[cur];
        while let Some(n) = chain.pop() {
            val = self.fz[n - 1].capped_expectation(val);
        }
        val
    }

    /// Expected value when a stop is permitted after every single draw.
    pub fn ev_per_draw(&self, r: usize) -> f64 {
        if r < self.ev_draw.len() {
            return self.ev_draw[r];
        }
        let mut val = self.ev_draw[self.ev_draw.len() - 1];
        for _ in self.ev_draw.len()..=r {
            val = self.base.capped_expectation(val);
        }
        val
    }

    /// Expected value with `t` full batches remaining (batch-granularity
    /// recurrence over Z_B).
    pub fn ev_per_batch(&self, t: usize) -> f64 {
        if t < self.ev_batch.len() {
            return self.ev_batch[t];
        }
        let z = &self.fz[self.batch_size - 1];
        let mut val = self.ev_batch[self.ev_batch.len() - 1];
        for _ in self.ev_batch.len()..=t {
            val = z.capped_expectation(val);
        }
        val
    }

    /// Marginal value of `k` additional draws from position `r`.
    /// Nonnegative by monotonicity of `Ef`.
    pub fn price(&self, r: usize, k: usize) -> f64 {
        self.ef(r + k) - self.ef(r)
    }

    /// P(X ≤ x) of the base distribution.
    pub fn cmf(&self, x: i64) -> f64 {
        self.base.cmf(x)
    }

    /// Base-distribution mass at `x`.
    pub fn pmf(&self, x: i64) -> f64 {
        self.base.pmf(x)
    }
}
