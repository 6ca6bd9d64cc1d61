//! Per-session decision model.
//!
//! A [`DecisionModel`] consumes one observed reward at a time through
//! [`DecisionModel::update`], tracks the running best of the batch in
//! progress, and consults the shared [`ProbabilityEngine`] tables to answer
//! stop / continue / spend-token at every completed batch. Claiming is never
//! permitted mid-batch.
//!
//! The session walk:
//!
//! ```text
//! Collecting ──batch full──► boundary decision ──► Stop { index }
//!     ▲                            │                    (terminal)
//!     │        continue / token spent                Exhausted when r
//!     └────────────────────────────┘                 reaches 0 unstopped
//! ```
//!
//! Beyond driving sessions, the model reconstructs the probability laws its
//! own policy induces: the reach law `F_r`, the stop-level law `p_r`, the
//! stopping-value law `p_k`, and the token-aware last-cycle law `p_last`.
//! These are exact (no simulation involved) and are what the Monte Carlo
//! suites verify against. The derived cutoff k* — the largest reward still
//! worth skipping with a token — comes from inverting `p_k`'s cmf against the
//! configured usage fraction, or, in the rate-matched variant, from a
//! monotone binary search on the retry-odds bound.

use std::sync::Arc;
use std::sync::OnceLock;

use crate::config::{ConfigError, ModelConfig};
use crate::distribution::{prefix_sum, Distribution};
use crate::engine::{round_up, ProbabilityEngine};

/// Decision signal returned by every [`DecisionModel::update`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No stop permitted or indicated; keep drawing.
    Continue,
    /// Stop and collect the value at `index` in the just-completed batch
    /// (first occurrence of the batch maximum).
    Stop { index: usize },
    /// A bonus token was spent; the horizon was extended to the next batch
    /// boundary instead of stopping.
    TokenSpent,
}

/// How the token-spend cutoff is derived, resolved once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenPolicy {
    /// At most one spend per session; k* is the largest support value whose
    /// model-implied emission cmf stays within the usage fraction.
    #[default]
    SingleSpend,
    /// Repeated spends allowed; k* is found by binary search as the largest
    /// k with `p_r(1)·Fz_B(k) / (1 − Fz_B(k)) ≤ usage_fraction`, so the
    /// expected spend rate per cycle still meets the target.
    RateMatched,
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Drawing; `update` accepts samples.
    Active,
    /// A stop decision was returned.
    Stopped,
    /// The horizon ran out with no stop (realized value 0).
    Exhausted,
}

/// Conditional emission-probability prefix tables behind `p_k`, split between
/// the full-batch schedule and the leading-remainder region. Built once on
/// first query, read-only afterwards.
#[derive(Debug, Clone)]
struct EmissionTables {
    cond: Vec<f64>,
    coff: Vec<f64>,
}

/// A stateful per-session decision model over shared engine tables.
#[derive(Debug, Clone)]
pub struct DecisionModel {
    engine: Arc<ProbabilityEngine>,
    cfg: ModelConfig,
    policy: TokenPolicy,
    /// Leading remainder `R mod B`, absorbed by the first batch.
    remainder: usize,
    /// `Ef(r)` for r = 0..=round_up(R, B), the bisection domain for `p_k`.
    e_list: Vec<f64>,
    /// Cutoff k*; `None` means no support value qualifies and tokens are
    /// never spent.
    cutoff: Option<i64>,

    // Session state, exclusively owned by this instance.
    r: usize,
    batch: Vec<i64>,
    best: Option<i64>,
    size: usize,
    tokens: u32,
    spend_armed: bool,
    phase: Phase,

    // Lazy introspection caches; deterministic functions of the
    // configuration, never of session state.
    reach: OnceLock<Vec<f64>>,
    emission: OnceLock<EmissionTables>,
}

impl DecisionModel {
    /// Builds a model (and its engine) for the baseline single-spend policy.
    pub fn new(base: Distribution, cfg: ModelConfig) -> Result<Self, ConfigError> {
        Self::with_policy(base, cfg, TokenPolicy::SingleSpend)
    }

    pub fn with_policy(
        base: Distribution,
        cfg: ModelConfig,
        policy: TokenPolicy,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let engine = Arc::new(ProbabilityEngine::new(
            base,
            cfg.batch_size,
            cfg.total_draws,
        )?);
        Self::with_engine(engine, cfg, policy)
    }

    /// Builds a model over an already-constructed engine, so many sessions
    /// can share one set of read-only tables.
    pub fn with_engine(
        engine: Arc<ProbabilityEngine>,
        cfg: ModelConfig,
        policy: TokenPolicy,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        if engine.batch_size() != cfg.batch_size || engine.horizon() != cfg.total_draws {
            return Err(ConfigError::EngineMismatch {
                engine_batch: engine.batch_size(),
                engine_horizon: engine.horizon(),
            });
        }

        let remainder = cfg.remainder();
        let top = round_up(cfg.total_draws, cfg.batch_size);
        let e_list: Vec<f64> = (0..=top).map(|r| engine.ef(r)).collect();

        let mut model = Self {
            engine,
            cfg,
            policy,
            remainder,
            e_list,
            cutoff: None,
            r: 0,
            batch: Vec::new(),
            best: None,
            size: 0,
            tokens: 0,
            spend_armed: false,
            phase: Phase::Active,
            reach: OnceLock::new(),
            emission: OnceLock::new(),
        };
        if model.cfg.token_enabled {
            model.cutoff = model.derive_cutoff();
            if let (TokenPolicy::SingleSpend, Some(k)) = (model.policy, model.cutoff) {
                debug_assert!(
                    model.emission_cmf(k) <= model.cfg.usage_fraction + 1e-12,
                    "cutoff violates the usage bound"
                );
            }
        }
        model.reset();
        Ok(model)
    }

    /// Resets to a fresh session. Banked tokens persist across resets; they
    /// accumulate over cycles until spent.
    pub fn reset(&mut self) {
        self.r = self.cfg.total_draws;
        self.batch.clear();
        self.best = None;
        self.size = if self.remainder > 0 {
            self.remainder
        } else {
            self.cfg.batch_size
        };
        self.spend_armed = self.cfg.token_enabled;
        self.phase = Phase::Active;
    }

    /// Banks one bonus token (the harness grants one per regeneration cycle).
    pub fn grant_token(&mut self) {
        self.tokens += 1;
    }

    /// Empties the token bank. Fresh harness workers start unbanked.
    pub fn clear_tokens(&mut self) {
        self.tokens = 0;
    }

    /// Feeds one observed reward and returns the decision for this position.
    ///
    /// Mid-batch positions always continue: claiming before the batch
    /// completes is disallowed, not merely suboptimal. At a completed batch
    /// the rule is `best > Ef(r)` (strict; ties continue), with the token
    /// spend intercepting stops whose best is still at or below k*.
    pub fn update(&mut self, value: i64) -> Decision {
        debug_assert!(
            self.phase == Phase::Active,
            "update() called on a terminal session"
        );
        if self.batch.len() == self.size {
            // previous batch resolved as continue; start the next one
            self.batch.clear();
            self.best = None;
            self.size = self.cfg.batch_size;
        }
        self.batch.push(value);
        let best = self.best.map_or(value, |b| b.max(value));
        self.best = Some(best);
        self.r -= 1;

        let boundary = self.batch.len() == self.size;
        if boundary && (best as f64) > self.engine.ef(self.r) {
            if self.spend_eligible(best) {
                self.spend_token();
                return Decision::TokenSpent;
            }
            let index = self
                .batch
                .iter()
                .position(|&x| x == best)
                .expect("running best must come from the current batch");
            self.phase = Phase::Stopped;
            return Decision::Stop { index };
        }
        if self.r == 0 {
            self.phase = Phase::Exhausted;
        }
        Decision::Continue
    }

    /// Token-spend preconditions: a banked token, configured availability,
    /// an armed latch (single-spend policy), and a batch best not worth
    /// banking. Any failed precondition falls closed to the ordinary stop.
    fn spend_eligible(&self, best: i64) -> bool {
        if !self.cfg.token_enabled || self.tokens == 0 || !self.spend_armed {
            return false;
        }
        match self.cutoff {
            Some(k) => best <= k,
            None => false,
        }
    }

    fn spend_token(&mut self) {
        debug_assert!(self.tokens > 0, "token spend without an available token");
        let delta = round_up(self.r + 1, self.cfg.batch_size) - self.r;
        self.r += delta;
        self.size += delta;
        self.tokens -= 1;
        if self.policy == TokenPolicy::SingleSpend {
            self.spend_armed = false;
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn config(&self) -> &ModelConfig {
        &self.cfg
    }

    pub fn engine(&self) -> &ProbabilityEngine {
        &self.engine
    }

    pub fn policy(&self) -> TokenPolicy {
        self.policy
    }

    /// Draws remaining before forced termination.
    pub fn remaining(&self) -> usize {
        self.r
    }

    /// The batch in progress (or the just-completed batch; it is cleared
    /// lazily so a `Stop { index }` can still be resolved against it).
    pub fn batch(&self) -> &[i64] {
        &self.batch
    }

    pub fn best(&self) -> Option<i64> {
        self.best
    }

    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    pub fn cutoff(&self) -> Option<i64> {
        self.cutoff
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_terminal(&self) -> bool {
        self.phase != Phase::Active
    }

    /// `Ef(r)`: optimal expected value with `r` draws remaining.
    pub fn ef(&self, r: usize) -> f64 {
        self.engine.ef(r)
    }

    // ── Cutoff derivation ────────────────────────────────────────────────

    fn derive_cutoff(&self) -> Option<i64> {
        match self.policy {
            TokenPolicy::SingleSpend => self.fixed_fraction_cutoff(),
            TokenPolicy::RateMatched => self.rate_matched_cutoff(),
        }
    }

    /// Largest support value whose implied emission cmf stays within the
    /// usage fraction; the next support value necessarily violates it. When
    /// even the smallest value violates the bound there is no cutoff and
    /// tokens go unspent.
    fn fixed_fraction_cutoff(&self) -> Option<i64> {
        let fraction = self.cfg.usage_fraction;
        let mut acc = 0.0;
        let mut cutoff = None;
        for &x in self.engine.base().support() {
            acc += self.plain_p_k(x);
            if acc <= fraction {
                cutoff = Some(x);
            } else {
                break;
            }
        }
        cutoff
    }

    /// Rate-matched cutoff: with repeated spends permitted, a cycle retries
    /// while the batch max stays at or below k, so the expected spends per
    /// cycle are `p_r(1)·F/(1−F)` with `F = Fz_B(k)`. The bound is monotone
    /// in k, hence the binary search.
    fn rate_matched_cutoff(&self) -> Option<i64> {
        let fraction = self.cfg.usage_fraction;
        let pr1 = self.p_r(1);
        let z = self.engine.fz(self.cfg.batch_size);
        let support = self.engine.base().support();
        let i = support.partition_point(|&x| {
            let f = z.cmf(x);
            f < 1.0 && pr1 * f / (1.0 - f) <= fraction
        });
        if i == 0 {
            None
        } else {
            Some(support[i - 1])
        }
    }

    // ── Introspection: the laws induced by the policy ────────────────────

    /// The batch-max law closing the batch at boundary `r`: the remainder
    /// region (first batch) uses Z_{R mod B}, everything below uses Z_B.
    fn z_for(&self, r: usize) -> &Distribution {
        if self.remainder > 0 && r >= self.cfg.total_draws - self.remainder {
            self.engine.fz(self.remainder)
        } else {
            self.engine.fz(self.cfg.batch_size)
        }
    }

    fn reach_table(&self) -> &[f64] {
        self.reach.get_or_init(|| {
            let total = self.cfg.total_draws;
            let b = self.cfg.batch_size;
            let mut fr = vec![0.0; total + 1];
            fr[total] = 1.0;
            for r in (0..total).rev() {
                // continuation is certain mid-batch; at a boundary it is the
                // probability this batch's max does not beat Ef(r)
                let p = if r % b == 0 {
                    self.z_for(r).cmf_at(self.engine.ef(r))
                } else {
                    1.0
                };
                fr[r] = p * fr[r + 1];
            }
            fr
        })
    }

    /// `F_r(r)`: probability the session reaches `r` draws remaining without
    /// having stopped. Defined for r in 0..=R; nondecreasing in r.
    pub fn reach_probability(&self, r: usize) -> f64 {
        if r >= self.cfg.total_draws {
            return 1.0;
        }
        self.reach_table()[r]
    }

    /// `p_r(r)`: probability the session stops exactly at `r` draws
    /// remaining.
    pub fn p_r(&self, r: usize) -> f64 {
        if r == 0 || r > self.cfg.total_draws {
            return 0.0;
        }
        let fr = self.reach_table();
        fr[r] - fr[r - 1]
    }

    fn emission_tables(&self) -> &EmissionTables {
        self.emission.get_or_init(|| {
            let total = self.cfg.total_draws;
            let cut = total - self.remainder;
            let mut mid = vec![0.0; total];
            let mut fin = vec![0.0; total];
            for r in 0..total {
                // probability a value is emitted given the session is at r
                let poss = 1.0 - self.z_for(r).cmf_at(self.engine.ef(r));
                if poss <= 0.0 {
                    continue;
                }
                let term = self.p_r(r + 1) / poss;
                if r < cut {
                    mid[r] = term;
                } else {
                    fin[r] = term;
                }
            }
            EmissionTables {
                cond: prefix_sum(&mid),
                coff: prefix_sum(&fin),
            }
        })
    }

    /// Stopping-value law of the token-blind policy: the batch-max emission
    /// law and the remainder-batch law, each weighted by the prefix-summed
    /// conditional stop mass attributable to its schedule region.
    fn plain_p_k(&self, k: i64) -> f64 {
        let t = self.emission_tables();
        // schedule regions with Ef(r) strictly below k can emit k; ties
        // continue, so they carry no mass
        let i = self
            .e_list
            .partition_point(|&v| v < k as f64)
            .min(self.cfg.total_draws);
        let base = self.engine.base();
        let full = base.batch_max_pmf(self.cfg.batch_size as u32, k);
        let partial = base.batch_max_pmf(self.remainder as u32, k);
        full * t.cond[i] + partial * t.coff[i]
    }

    /// `p_k(k)`: overall probability the session stops holding value `k`.
    /// Token-enabled models shift last-cycle mass through [`Self::p_last`].
    pub fn p_k(&self, k: i64) -> f64 {
        let plain = self.plain_p_k(k);
        if !self.cfg.token_enabled || self.cutoff.is_none() {
            return plain;
        }
        let z = self.engine.fz(self.cfg.batch_size);
        plain + self.p_r(1) * (self.p_last(k) - z.pmf(k))
    }

    /// Emission law of the last possible cycle. Under a cutoff, mass at or
    /// below k* becomes the 2B-draw batch-max (the token re-rolls the final
    /// batch) and mass above k* is reweighted by `1 + Fz_B(k*)`; with no
    /// cutoff in effect it is the plain final-batch law.
    pub fn p_last(&self, k: i64) -> f64 {
        let b = self.cfg.batch_size;
        let z = self.engine.fz(b);
        match self.cutoff {
            Some(kp) if self.cfg.token_enabled => {
                if k > kp {
                    (1.0 + z.cmf(kp)) * z.pmf(k)
                } else {
                    self.engine.base().batch_max_pmf(2 * b as u32, k)
                }
            }
            _ => z.pmf(k),
        }
    }

    /// Cmf of the token-blind stopping-value law; the inversion target for
    /// the single-spend cutoff.
    pub fn emission_cmf(&self, x: i64) -> f64 {
        self.engine
            .base()
            .support()
            .iter()
            .take_while(|&&v| v <= x)
            .map(|&v| self.plain_p_k(v))
            .sum()
    }

    // ── Indifference pricing ─────────────────────────────────────────────

    /// Expected value of seeing the current batch through, holding best `k`:
    /// the capped expectation of the in-progress batch-max Z_{r mod B}. At a
    /// boundary the batch is already resolved and the value is `k` itself.
    pub fn eloss(&self, r: usize, k: f64) -> f64 {
        let n = r % self.cfg.batch_size;
        if n == 0 {
            return k;
        }
        self.engine.fz(n).capped_expectation(k)
    }

    /// Value of the position if nothing is bought or sold.
    pub fn status_quo(&self, r: usize, k: f64) -> f64 {
        self.eloss(r, k).max(self.engine.ef(r))
    }

    /// Indifference price for acquiring `draws` additional draws from the
    /// current position. Never negative.
    pub fn buy(&self, draws: usize) -> f64 {
        let k = self.best_as_f64();
        (self.engine.ef(self.r + draws) - self.status_quo(self.r, k)).max(0.0)
    }

    /// Indifference price for abandoning the current position.
    pub fn sell(&self) -> f64 {
        let k = self.best_as_f64();
        self.status_quo(self.r, k) - k
    }

    fn best_as_f64(&self) -> f64 {
        self.best.map_or(f64::NEG_INFINITY, |b| b as f64)
    }
}
