//! Model configuration.
//!
//! Every model instance owns an explicit [`ModelConfig`] value; several models
//! with different configurations can coexist for comparison, so there are no
//! process-wide mutable defaults.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid configuration, detected before any table is built.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("batch size must be at least 1")]
    ZeroBatchSize,
    #[error("total draws must be at least 1")]
    ZeroHorizon,
    #[error("token cycle must be at least 1")]
    ZeroTokenCycle,
    #[error("usage fraction must be in (0, 1], got {0}")]
    UsageFractionRange(f64),
    #[error("engine was built for batch size {engine_batch} and horizon {engine_horizon}")]
    EngineMismatch {
        engine_batch: usize,
        engine_horizon: usize,
    },
}

/// Immutable per-model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Total draws R before forced termination.
    pub total_draws: usize,
    /// Draws per batch B; stop decisions are only permitted at batch
    /// boundaries.
    pub batch_size: usize,
    /// Whether spending bonus tokens is permitted at all.
    pub token_enabled: bool,
    /// Sessions per granted token (the regeneration cycle).
    pub token_cycle: usize,
    /// Acceptable long-run fraction of sessions that spend a token.
    pub usage_fraction: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            total_draws: 30,
            batch_size: 10,
            token_enabled: true,
            token_cycle: 8,
            usage_fraction: 1.0 / 8.0,
        }
    }
}

impl ModelConfig {
    /// A config with tokens enabled and the usage fraction tied to the cycle
    /// length (one token granted per cycle, spent at most that often).
    pub fn with_token_cycle(total_draws: usize, batch_size: usize, token_cycle: usize) -> Self {
        Self {
            total_draws,
            batch_size,
            token_enabled: true,
            token_cycle,
            usage_fraction: 1.0 / token_cycle.max(1) as f64,
        }
    }

    /// A token-disabled config.
    pub fn without_tokens(total_draws: usize, batch_size: usize) -> Self {
        Self {
            total_draws,
            batch_size,
            token_enabled: false,
            ..Self::default()
        }
    }

    /// The leading-remainder size `R mod B` absorbed by the first batch.
    pub fn remainder(&self) -> usize {
        self.total_draws % self.batch_size
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.total_draws == 0 {
            return Err(ConfigError::ZeroHorizon);
        }
        if self.token_cycle == 0 {
            return Err(ConfigError::ZeroTokenCycle);
        }
        if !(self.usage_fraction > 0.0 && self.usage_fraction <= 1.0) {
            return Err(ConfigError::UsageFractionRange(self.usage_fraction));
        }
        Ok(())
    }
}
