// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Job- and task-level fault state.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a flagged job may be restarted. Parsed from the job's reschedule label;
/// an absent or unrecognized label means `Off`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RescheduleMode {
    #[default]
    Off,
    /// Cooperative delete routed through the scheduler session.
    Grace,
    /// Direct deletion bypassing session bookkeeping.
    Force,
}

impl FromStr for RescheduleMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "grace" => Self::Grace,
            "force" => Self::Force,
            _ => Self::Off,
        })
    }
}

impl std::fmt::Display for RescheduleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Grace => write!(f, "grace"),
            Self::Force => write!(f, "force"),
        }
    }
}

/// Policy for non-fatal degraded-but-operational faults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubHealthStrategy {
    #[default]
    Ignore,
    GraceExit,
    ForceExit,
}

impl FromStr for SubHealthStrategy {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "grace-exit" => Self::GraceExit,
            "force-exit" => Self::ForceExit,
            _ => Self::Ignore,
        })
    }
}

/// Distinct causes a task can be flagged for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FaultKind {
    NodeUnhealthy,
    CardUnhealthy,
    CardNetworkUnhealthy,
    PodFailed,
    CardSubHealthy,
    SwitchSubHealthy,
}

impl FaultKind {
    /// Sub-health kinds are non-fatal and never gate on the retry budget.
    pub fn is_sub_health(&self) -> bool {
        matches!(self, FaultKind::CardSubHealthy | FaultKind::SwitchSubHealthy)
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultKind::NodeUnhealthy => write!(f, "NodeUnhealthy"),
            FaultKind::CardUnhealthy => write!(f, "CardUnhealthy"),
            FaultKind::CardNetworkUnhealthy => write!(f, "CardNetworkUnhealthy"),
            FaultKind::PodFailed => write!(f, "PodFailed"),
            FaultKind::CardSubHealthy => write!(f, "CardSubHealthy"),
            FaultKind::SwitchSubHealthy => write!(f, "SwitchSubHealthy"),
        }
    }
}

/// Structured cause attached to a fault task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FaultReason {
    pub kind: FaultKind,
    /// The accelerator involved, for card-level kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<String>,
    pub message: String,
}

impl FaultReason {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            card: None,
            message: message.into(),
        }
    }

    pub fn for_card(kind: FaultKind, card: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            card: Some(card.into()),
            message: message.into(),
        }
    }
}

/// Fault state of one task, owned exclusively by its [`FaultJob`].
///
/// Rebuilt or merged on every sync from the live task list; a task missing
/// from the live job is treated as already restarted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FaultTask {
    #[serde(rename = "TaskUID")]
    pub task_uid: String,
    pub task_name: String,
    pub node_name: String,
    pub node_rank_index: i64,
    pub use_card_name: Vec<String>,
    pub is_fault_task: bool,
    /// Primary fault classification; `None` while healthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault_kind: Option<FaultKind>,
    #[serde(rename = "Reason")]
    pub reasons: Vec<FaultReason>,
    pub is_being_graceful_deleted: bool,
    /// Session time the grace delete was issued; 0 when none is in flight.
    pub grace_deleted_at: i64,
}

impl FaultTask {
    /// Block membership under the given block size; `None` for unscheduled
    /// tasks with no rank yet.
    pub fn block(&self, block_size: u32) -> Option<i64> {
        (self.node_rank_index >= 0).then(|| self.node_rank_index / i64::from(block_size))
    }
}

/// Cross-session identity for a job: UID first, with a `(namespace, stable
/// reference name)` fallback for elastic jobs whose UID changes between
/// generations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub uid: String,
    pub namespace: String,
    pub reference: String,
}

/// Cached fault state for one job.
///
/// Created the first session the job is observed; removed from cache when it
/// exceeds the maximum wait window or is confirmed fully restarted.
///
/// Invariant: `is_fault_job == false` implies `fault_kinds` is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FaultJob {
    #[serde(rename = "JobUID")]
    pub job_uid: String,
    pub job_name: String,
    pub namespace: String,
    /// Stable name used to re-identify the job when its UID changes.
    pub reference_name: String,
    #[serde(rename = "ReScheduleKey")]
    pub reschedule_mode: RescheduleMode,
    pub is_fault_job: bool,
    pub fault_tasks: Vec<FaultTask>,
    /// Distinct fault kinds across this job's fault tasks.
    #[serde(rename = "FaultTypes")]
    pub fault_kinds: Vec<FaultKind>,
    /// Consecutive sessions spent in single-task rescheduling; drives the
    /// escalation tier.
    pub pending_session_num: u32,
    #[serde(rename = "DeleteExecutedFlag")]
    pub delete_executed: bool,
    pub delete_executed_at: i64,
    pub sub_health_strategy: SubHealthStrategy,
    pub fault_retry_times: i32,
    /// Job generation identifier; a change means a new generation.
    pub generation: String,
    pub is_master_fault: bool,
    /// The job spans superpod topology and persists under that partition.
    pub uses_superpod: bool,
    /// Session time the current fault episode began; 0 while healthy. The
    /// stale-wait window is measured from here, spanning the whole episode
    /// through eviction until the restart is confirmed.
    pub fault_since: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl FaultJob {
    pub fn key(&self) -> JobKey {
        JobKey {
            uid: self.job_uid.clone(),
            namespace: self.namespace.clone(),
            reference: self.reference_name.clone(),
        }
    }

    /// True only when every recorded fault kind is a sub-health kind.
    pub fn is_sub_health_fault(&self) -> bool {
        !self.fault_kinds.is_empty() && self.fault_kinds.iter().all(FaultKind::is_sub_health)
    }

    pub fn fault_task(&self, task_uid: &str) -> Option<&FaultTask> {
        self.fault_tasks.iter().find(|t| t.task_uid == task_uid)
    }

    pub fn rank_zero(&self) -> Option<&FaultTask> {
        self.fault_tasks.iter().find(|t| t.node_rank_index == 0)
    }
}
