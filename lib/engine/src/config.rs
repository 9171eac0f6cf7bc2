// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Engine configuration.
//!
//! Configuration is loaded from, in increasing priority:
//!   1. Built-in defaults.
//!   2. Optional TOML file pointed to by the `RESCHED_CONFIG_PATH` environment
//!      variable.
//!   3. `RESCHED_`-prefixed environment variables (e.g. `RESCHED_BLOCK_SIZE`).
//!
//! Every constant the escalation policy consults is a field here so that tier
//! boundaries, windows, and budgets can be tuned per cluster without a
//! rebuild.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::Result;

/// ENV pointing at an optional TOML configuration file.
const CONFIG_PATH_ENV: &str = "RESCHED_CONFIG_PATH";

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "RESCHED_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Ranks per topology block; block membership is `rank / block_size`.
    pub block_size: u32,

    /// Pending-session count at which eviction scope widens to the block tier.
    pub tier_block_sessions: u32,
    /// Pending-session count at which eviction scope widens to the superpod tier.
    pub tier_superpod_sessions: u32,
    /// Pending-session count at which the whole job becomes eligible.
    pub tier_job_sessions: u32,

    /// Pending value forced while the platform reports process-recovery failure.
    pub recovery_reset_sessions: u32,
    /// Pending value fast-forwarded to once recovery reports healthy again.
    pub recovery_resume_sessions: u32,

    /// Tasks per concurrent deletion batch.
    pub delete_batch_size: usize,
    /// Grace period handed to cooperative deletes, in seconds.
    pub grace_period_secs: i64,
    /// A grace delete older than this escalates to a force delete.
    pub grace_delete_timeout_secs: i64,

    /// Stale-job eviction window: a cached fault job older than this is dropped.
    pub max_wait_secs: i64,

    /// Retry budget seed when the job carries no retry annotation.
    pub default_retry_times: i32,
    /// In-memory per-job cap on reschedule history records.
    pub max_records_per_job: usize,
    /// Serialized-size ceiling for the persisted history kind, in bytes.
    pub history_byte_budget: usize,
    /// Truncation loop ceiling for the history kind.
    pub history_truncate_max_iters: usize,

    /// Score subtracted from nodes previously used by a task's fault history.
    pub repeat_node_penalty: f64,

    /// Consume the out-of-band nodeD health annotation.
    pub node_d_enabled: bool,

    /// Name of the persisted snapshot object.
    pub snapshot_name: String,
    /// Namespace the snapshot object lives in.
    pub snapshot_namespace: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: 8,
            tier_block_sessions: 5,
            tier_superpod_sessions: 10,
            tier_job_sessions: 15,
            recovery_reset_sessions: 1,
            recovery_resume_sessions: 5,
            delete_batch_size: 8,
            grace_period_secs: 30,
            grace_delete_timeout_secs: 900,
            max_wait_secs: 1800,
            default_retry_times: 3,
            max_records_per_job: 5,
            history_byte_budget: 950_000,
            history_truncate_max_iters: 100,
            repeat_node_penalty: 64.0,
            node_d_enabled: false,
            snapshot_name: "resched-fault-snapshot".to_string(),
            snapshot_namespace: "kube-system".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from defaults, the optional TOML file, and the
    /// environment.
    pub fn from_settings() -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            figment = figment.merge(Toml::file(path));
        }
        let config: EngineConfig = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the policy engine cannot run under.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            crate::raise!("block_size must be > 0");
        }
        if self.delete_batch_size == 0 {
            crate::raise!("delete_batch_size must be > 0");
        }
        if self.tier_block_sessions == 0
            || self.tier_superpod_sessions <= self.tier_block_sessions
            || self.tier_job_sessions <= self.tier_superpod_sessions
        {
            crate::raise!(
                "escalation tiers must be strictly increasing, got {}/{}/{}",
                self.tier_block_sessions,
                self.tier_superpod_sessions,
                self.tier_job_sessions
            );
        }
        if self.history_truncate_max_iters == 0 {
            crate::raise!("history_truncate_max_iters must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_non_monotone_tiers_rejected() {
        let config = EngineConfig {
            tier_block_sessions: 10,
            tier_superpod_sessions: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_block_size_rejected() {
        let config = EngineConfig {
            block_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
