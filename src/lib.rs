//! # batchstop — Optimal stopping for batched reward draws
//!
//! Computes the optimal stopping policy for a session of `R` draws from a
//! discrete reward distribution, revealed in batches of `B`, where a claim is
//! only permitted at batch boundaries and at most one value can be kept. The
//! core quantity is `Ef(r)`, the expected value of playing the remaining `r`
//! draws optimally, obtained by **backward induction** over capped
//! expectations of batch-max distributions.
//!
//! ## Module overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`distribution`] | Discrete distributions over sorted integer supports: pmf/cmf prefix tables, O(log n) capped expectation, batch-max powers, sampling |
//! | [`engine`] | The `Ef` recurrence and per-draw / per-batch value tables, shared read-only across models |
//! | [`config`] | Session parameters (horizon, batch size, token cycle) and validation |
//! | [`model`] | Per-session decision state machine, bonus-token spending, the induced laws `F_r` / `p_r` / `p_k` / `p_last`, and indifference pricing |
//! | [`simulation`] | Parallel Monte Carlo harness measuring the histograms the exact laws predict |
//!
//! ## Conventions
//!
//! - `r` counts draws **remaining**; `r = R` is a fresh session and `r = 0`
//!   is exhaustion (value 0).
//! - When `R` is not a multiple of `B`, the first batch absorbs the
//!   remainder `R mod B`, so every decision boundary sits at a multiple of
//!   `B`.
//! - The stop rule at a completed batch is strict: claim when the batch best
//!   exceeds `Ef(r)`, continue on ties.
//!
//! ## Example
//!
//! ```
//! use batchstop::{Distribution, DecisionModel, ModelConfig, Decision};
//!
//! let base = Distribution::from_pmf(vec![1, 5, 10], vec![0.5, 0.3, 0.2])?;
//! let mut model = DecisionModel::new(base, ModelConfig::without_tokens(6, 3))?;
//! let mut claimed = None;
//! for draw in [1, 5, 1, 10, 1, 1] {
//!     match model.update(draw) {
//!         Decision::Stop { index } => {
//!             claimed = Some(model.batch()[index]);
//!             break;
//!         }
//!         _ => {}
//!     }
//! }
//! assert_eq!(claimed, Some(10));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod distribution;
pub mod engine;
pub mod model;
pub mod simulation;

pub use config::{ConfigError, ModelConfig};
pub use distribution::{Distribution, DistributionError};
pub use engine::ProbabilityEngine;
pub use model::{Decision, DecisionModel, Phase, TokenPolicy};
pub use simulation::{simulate, simulate_sequential, SimulationReport};
