// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Collaborator interfaces: the read-only cluster snapshot handed in each
//! session, the pod deletion executor, the persisted-snapshot store, and the
//! cooperative in-session eviction handle.
//!
//! The engine consumes these; it never reimplements them. Production
//! implementations live in [`kube`](crate::cluster::kube); in-memory
//! implementations for tests live in [`memory`](crate::cluster::memory).

pub mod kube;
pub mod memory;

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use async_trait::async_trait;

use crate::model::{RescheduleMode, SubHealthStrategy};
use crate::Result;

// Node annotation keys written by the upstream health-signal producers.
pub const CARDS_ANNOTATION: &str = "resched.io/cards";
pub const UNHEALTHY_CARDS_ANNOTATION: &str = "resched.io/unhealthy-cards";
pub const NETWORK_UNHEALTHY_CARDS_ANNOTATION: &str = "resched.io/network-unhealthy-cards";
pub const NODE_HEALTH_ANNOTATION: &str = "resched.io/node-health";
pub const SWITCH_HEALTH_ANNOTATION: &str = "resched.io/switch-health";
pub const CARD_SUB_HEALTH_ANNOTATION: &str = "resched.io/card-sub-health";
pub const SWITCH_SUB_HEALTH_ANNOTATION: &str = "resched.io/switch-sub-health";
pub const HEARTBEAT_ANNOTATION: &str = "resched.io/heartbeat";

// Job labels and annotations.
pub const RESCHEDULE_LABEL: &str = "resched.io/reschedule";
pub const SUB_HEALTH_STRATEGY_ANNOTATION: &str = "resched.io/sub-health-strategy";
pub const RETRY_TIMES_ANNOTATION: &str = "resched.io/retry-times";
pub const PROCESS_RECOVERY_LABEL: &str = "resched.io/process-recovery";
pub const RECOVERY_FAILED_ANNOTATION: &str = "resched.io/recovery-failed";
pub const GENERATION_ANNOTATION: &str = "resched.io/generation";

/// The value upstream health producers write for an unhealthy verdict.
pub const UNHEALTHY_VALUE: &str = "Unhealthy";

/// Pod lifecycle phase as reported by the cluster snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl FromStr for PodPhase {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        })
    }
}

/// One node as the scheduler saw it this session. Read-only.
#[derive(Debug, Clone, Default)]
pub struct NodeRecord {
    pub name: String,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

impl NodeRecord {
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Parse a comma-separated card list annotation; absent means empty.
    pub fn card_list(&self, key: &str) -> Vec<String> {
        self.annotation(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// One task (pod) of a live job. Read-only.
#[derive(Debug, Clone, Default)]
pub struct TaskRecord {
    pub task_uid: String,
    pub task_name: String,
    pub pod_name: String,
    pub pod_uid: String,
    pub namespace: String,
    /// Empty while the task has not been scheduled onto a node.
    pub node_name: String,
    /// Rank index within the job; negative while unassigned.
    pub rank_index: i64,
    pub used_cards: Vec<String>,
    pub pod_phase: PodPhase,
    pub annotations: BTreeMap<String, String>,
}

/// One live job with its tasks. Read-only.
#[derive(Debug, Clone, Default)]
pub struct JobRecord {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    /// Stable name surviving elastic UID changes.
    pub reference_name: String,
    /// Minimum tasks that must be allocated for the job to run.
    pub min_available: u32,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub tasks: Vec<TaskRecord>,
}

impl JobRecord {
    pub fn reschedule_mode(&self) -> RescheduleMode {
        self.labels
            .get(RESCHEDULE_LABEL)
            .map(|v| v.parse().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn sub_health_strategy(&self) -> SubHealthStrategy {
        self.annotations
            .get(SUB_HEALTH_STRATEGY_ANNOTATION)
            .map(|v| v.parse().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Retry budget seed, from the annotation or the configured default.
    pub fn retry_times(&self, default: i32) -> i32 {
        self.annotations
            .get(RETRY_TIMES_ANNOTATION)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Generation identifier; falls back to the UID when unannotated.
    pub fn generation(&self) -> String {
        self.annotations
            .get(GENERATION_ANNOTATION)
            .cloned()
            .unwrap_or_else(|| self.uid.clone())
    }

    pub fn is_process_recovery(&self) -> bool {
        self.labels.contains_key(PROCESS_RECOVERY_LABEL)
    }

    pub fn recovery_failed(&self) -> bool {
        self.annotations
            .get(RECOVERY_FAILED_ANNOTATION)
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    /// Tasks currently scheduled and running.
    pub fn allocated_count(&self) -> u32 {
        self.tasks
            .iter()
            .filter(|t| !t.node_name.is_empty() && t.pod_phase == PodPhase::Running)
            .count() as u32
    }
}

/// One scheduling cycle's view of the cluster. Consumed read-only.
#[derive(Debug, Clone, Default)]
pub struct ClusterView {
    pub nodes: HashMap<String, NodeRecord>,
    pub jobs: HashMap<String, JobRecord>,
    /// Node name to superpod identifier, for the superpod escalation tier.
    pub node_superpod: HashMap<String, String>,
}

impl ClusterView {
    pub fn superpod_of(&self, node_name: &str) -> Option<&str> {
        self.node_superpod.get(node_name).map(String::as_str)
    }
}

/// Accessor for the persisted snapshot object.
///
/// `merge` follows a best-effort conflict-free contract: the engine always
/// reads the full string map and only replaces the keys it owns.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read the full string map, or `None` when the object does not exist.
    async fn load(&self, name: &str) -> Result<Option<BTreeMap<String, String>>>;

    /// Create the object if absent, otherwise overwrite exactly the given
    /// keys, leaving all others untouched.
    async fn merge(&self, name: &str, entries: BTreeMap<String, String>) -> Result<()>;
}

/// Pod deletion executor, used identically for grace and force paths.
#[async_trait]
pub trait PodDeleter: Send + Sync {
    /// Delete `namespace/name`, optionally preconditioned on pod UID, with an
    /// optional grace period in seconds.
    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        uid: Option<&str>,
        grace_period_secs: Option<i64>,
    ) -> Result<()>;
}

/// Cooperative eviction through the scheduler session. Fails when the task is
/// no longer present in-session.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    async fn evict_task(&self, job_uid: &str, task_uid: &str, reason: &str) -> Result<()>;
}
