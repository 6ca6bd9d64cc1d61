//! Monte Carlo session harness.
//!
//! Plays N sessions with the model's own policy and measures the realized
//! value distribution plus the event histograms the introspective laws
//! predict: reach counts per level, stop counts per level, claimed-value
//! counts, last-cycle claims, and token spends. The suite in
//! `tests/test_model.rs` checks each histogram against the corresponding
//! exact law.
//!
//! Two drivers:
//!
//! - [`simulate`] runs sessions in parallel over contiguous chunks with
//!   per-iteration deterministic seeding. Token banking is kept within each
//!   chunk, so spend totals can differ marginally from a single sequential
//!   run of the same seed.
//! - [`simulate_sequential`] replays the exact grant-then-play loop on one
//!   model instance, banking tokens globally. Token-rate assertions use this
//!   one.

use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::Serialize;
use std::time::Instant;

use crate::engine::round_up;
use crate::model::{Decision, DecisionModel};

/// Sessions per parallel work unit. Tokens bank within a chunk only.
const CHUNK: usize = 4096;

/// Outcome of a single simulated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Claimed value, or 0 when the horizon lapsed unclaimed.
    pub value: i64,
    /// Draws remaining at the claim, counting the claiming draw. `None` when
    /// the session exhausted.
    pub stop_level: Option<usize>,
    /// Tokens spent during this session.
    pub token_spends: u32,
    /// Lowest level entered, for reach accounting after token extensions.
    pub lowest: usize,
}

/// Aggregate statistics and event histograms over a batch of sessions.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub iterations: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: i64,
    pub max: i64,
    /// Sessions whose horizon lapsed unclaimed.
    pub exhausted: usize,
    pub token_spends: u64,
    /// Visits to each level r in 0..=R, counted for claimed sessions only.
    pub reach_counts: Vec<u64>,
    /// Claims at each level r in 0..=R.
    pub stop_counts: Vec<u64>,
    /// Claims of each support value, indexed by support position.
    pub value_counts: Vec<u64>,
    /// Claims of each support value at level 1 (the final possible draw).
    pub last_counts: Vec<u64>,
    pub elapsed: std::time::Duration,
}

impl SimulationReport {
    /// Empirical reach cmf, normalized by its largest count so it ends at 1.
    pub fn reach_cmf(&self) -> Vec<f64> {
        let top = self.reach_counts.iter().copied().max().unwrap_or(0).max(1) as f64;
        self.reach_counts.iter().map(|&c| c as f64 / top).collect()
    }

    /// Empirical stop-level pmf, normalized by total claims.
    pub fn stop_pmf(&self) -> Vec<f64> {
        normalized(&self.stop_counts)
    }

    /// Empirical claimed-value pmf over the support, normalized by total
    /// claims.
    pub fn value_pmf(&self) -> Vec<f64> {
        normalized(&self.value_counts)
    }

    /// Empirical last-cycle claimed-value pmf.
    pub fn last_pmf(&self) -> Vec<f64> {
        normalized(&self.last_counts)
    }

    /// Token spends per session.
    pub fn spend_rate(&self) -> f64 {
        self.token_spends as f64 / self.iterations as f64
    }
}

/// A token spent at a remainder boundary can lift the level past R, so the
/// histograms run to the next batch multiple.
fn level_count(model: &DecisionModel) -> usize {
    round_up(model.config().total_draws, model.config().batch_size) + 1
}

fn normalized(counts: &[u64]) -> Vec<f64> {
    let total = counts.iter().sum::<u64>().max(1) as f64;
    counts.iter().map(|&c| c as f64 / total).collect()
}

/// Plays one session to termination and reports the outcome.
///
/// The model is reset first; banked tokens survive the reset. Draw values are
/// sampled from the engine's base distribution.
pub fn run_session(model: &mut DecisionModel, rng: &mut SmallRng) -> SessionOutcome {
    model.reset();
    let mut lowest = model.remaining();
    let mut spends = 0u32;
    while model.remaining() > 0 {
        let level = model.remaining();
        lowest = lowest.min(level);
        let k = model.engine().base().sample(rng);
        match model.update(k) {
            Decision::Continue => {}
            Decision::TokenSpent => spends += 1,
            Decision::Stop { index } => {
                let value = model.batch()[index];
                return SessionOutcome {
                    value,
                    stop_level: Some(level),
                    token_spends: spends,
                    lowest,
                };
            }
        }
    }
    SessionOutcome {
        value: 0,
        stop_level: None,
        token_spends: spends,
        lowest,
    }
}

/// Running accumulator for one chunk of sessions, merged at the end.
struct Accum {
    n: usize,
    sum: f64,
    sum_sq: f64,
    min: i64,
    max: i64,
    exhausted: usize,
    token_spends: u64,
    reach_counts: Vec<u64>,
    stop_counts: Vec<u64>,
    value_counts: Vec<u64>,
    last_counts: Vec<u64>,
}

impl Accum {
    fn new(levels: usize, values: usize) -> Self {
        Self {
            n: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: i64::MAX,
            max: i64::MIN,
            exhausted: 0,
            token_spends: 0,
            reach_counts: vec![0; levels],
            stop_counts: vec![0; levels],
            value_counts: vec![0; values],
            last_counts: vec![0; values],
        }
    }

    fn record(&mut self, model: &DecisionModel, out: &SessionOutcome) {
        self.n += 1;
        let v = out.value as f64;
        self.sum += v;
        self.sum_sq += v * v;
        self.min = self.min.min(out.value);
        self.max = self.max.max(out.value);
        self.token_spends += u64::from(out.token_spends);
        match out.stop_level {
            Some(level) => {
                self.stop_counts[level] += 1;
                // reach credit covers every level the session passed through
                for r in out.lowest..self.reach_counts.len() {
                    self.reach_counts[r] += 1;
                }
                if let Some(i) = model.engine().base().index_of(out.value) {
                    self.value_counts[i] += 1;
                    if level == 1 {
                        self.last_counts[i] += 1;
                    }
                }
            }
            None => self.exhausted += 1,
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.n += other.n;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.exhausted += other.exhausted;
        self.token_spends += other.token_spends;
        for (a, b) in self.reach_counts.iter_mut().zip(&other.reach_counts) {
            *a += b;
        }
        for (a, b) in self.stop_counts.iter_mut().zip(&other.stop_counts) {
            *a += b;
        }
        for (a, b) in self.value_counts.iter_mut().zip(&other.value_counts) {
            *a += b;
        }
        for (a, b) in self.last_counts.iter_mut().zip(&other.last_counts) {
            *a += b;
        }
        self
    }

    fn into_report(self, elapsed: std::time::Duration) -> SimulationReport {
        let n = self.n.max(1) as f64;
        let mean = self.sum / n;
        let variance = (self.sum_sq / n - mean * mean).max(0.0);
        SimulationReport {
            iterations: self.n,
            mean,
            std_dev: variance.sqrt(),
            min: if self.n == 0 { 0 } else { self.min },
            max: if self.n == 0 { 0 } else { self.max },
            exhausted: self.exhausted,
            token_spends: self.token_spends,
            reach_counts: self.reach_counts,
            stop_counts: self.stop_counts,
            value_counts: self.value_counts,
            last_counts: self.last_counts,
            elapsed,
        }
    }
}

/// Simulates `iterations` sessions in parallel, returning aggregate
/// statistics.
///
/// Each chunk clones the model (with an empty token bank), seeds its own
/// `SmallRng` from `seed` and the chunk index, and grants one token whenever
/// a session's global index lands on a token-cycle boundary.
pub fn simulate(model: &DecisionModel, iterations: usize, seed: u64) -> SimulationReport {
    let start = Instant::now();
    let levels = level_count(model);
    let values = model.engine().base().len();
    let cycle = model.config().token_cycle as usize;

    let chunks = iterations.div_ceil(CHUNK);
    let merged = (0..chunks)
        .into_par_iter()
        .map(|c| {
            let lo = c * CHUNK;
            let hi = (lo + CHUNK).min(iterations);
            let mut m = model.clone();
            m.clear_tokens();
            let mut rng = SmallRng::seed_from_u64(seed.wrapping_add(c as u64));
            let mut acc = Accum::new(levels, values);
            for i in lo..hi {
                if m.config().token_enabled && i % cycle == 0 {
                    m.grant_token();
                }
                let out = run_session(&mut m, &mut rng);
                acc.record(&m, &out);
            }
            acc
        })
        .reduce(
            || Accum::new(levels, values),
            Accum::merge,
        );

    merged.into_report(start.elapsed())
}

/// Simulates `iterations` sessions on one model instance with a single rng,
/// banking tokens across the whole run. Slower but exact; use for token-rate
/// measurements.
pub fn simulate_sequential(
    model: &mut DecisionModel,
    iterations: usize,
    seed: u64,
) -> SimulationReport {
    let start = Instant::now();
    let levels = level_count(model);
    let values = model.engine().base().len();
    let cycle = model.config().token_cycle as usize;

    let mut rng = SmallRng::seed_from_u64(seed);
    let mut acc = Accum::new(levels, values);
    for i in 0..iterations {
        if model.config().token_enabled && i % cycle == 0 {
            model.grant_token();
        }
        let out = run_session(model, &mut rng);
        acc.record(model, &out);
    }
    acc.into_report(start.elapsed())
}
