// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Resched: fault-state tracking and escalation-driven rescheduling for
//! distributed accelerator training jobs.
//!
//! The engine plugs into a batch scheduler: once per scheduling session it is
//! handed a read-only [`cluster::ClusterView`], reconciles the cached fault
//! state against it, decides which tasks to evict under the tiered escalation
//! policy, executes the deletions, and persists the updated snapshot through a
//! [`cluster::ConfigStore`].

pub use anyhow::{
    Context as ErrorContext, Error, Ok as OK, Result, anyhow as error, bail as raise,
};

pub mod budget;
pub mod cache;
pub mod classify;
pub mod cluster;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod placement;
pub mod policy;
pub mod session;
pub mod snapshot;

pub use cache::FaultCache;
pub use config::EngineConfig;
pub use session::{session_now, SessionOutcome, SessionReconciler};
