// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Concurrent deletion execution.
//!
//! The eligible task set is partitioned into fixed-size batches; batches run
//! in parallel and are joined before the cycle proceeds to bookkeeping. A
//! single task's failure is logged and isolated: the rest of the batch, and
//! the other batches, are unaffected, and the owning job simply stays
//! "not yet executed" for retry next session.

use std::collections::BTreeSet;

use futures::future::join_all;
use tracing::{info, warn};

use super::{decide_task, TaskDecision};
use crate::cluster::{JobRecord, PodDeleter, SessionHandle};
use crate::config::EngineConfig;
use crate::model::{FaultJob, RescheduleMode, SubHealthStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeletePath {
    /// Cooperative eviction through the scheduler session.
    Grace,
    /// Direct deletion bypassing session bookkeeping.
    Force,
}

#[derive(Debug, Clone)]
struct DeletePlan {
    task_uid: String,
    pod_name: String,
    pod_uid: String,
    namespace: String,
    path: DeletePath,
}

/// What the executor did for one job this cycle.
#[derive(Debug, Clone, Default)]
pub struct DeletionOutcome {
    /// Task UIDs whose eviction was issued successfully.
    pub deleted: Vec<String>,
    /// Subset of `deleted` that went through the grace path and is now
    /// awaiting cooperative termination.
    pub graced: Vec<String>,
    /// Task UIDs whose eviction failed; retried next session.
    pub failed: Vec<String>,
}

impl DeletionOutcome {
    /// The job counts as executed only when everything eligible went through.
    pub fn fully_executed(&self) -> bool {
        self.failed.is_empty() && !self.deleted.is_empty()
    }
}

/// Evict the eligible tasks of one flagged job.
pub async fn execute_deletions(
    job: &mut FaultJob,
    live: &JobRecord,
    eligible: &BTreeSet<String>,
    session: &dyn SessionHandle,
    deleter: &dyn PodDeleter,
    config: &EngineConfig,
    now: i64,
) -> DeletionOutcome {
    let mut outcome = DeletionOutcome::default();
    if job.reschedule_mode == RescheduleMode::Off {
        return outcome;
    }

    let force_job = job.reschedule_mode == RescheduleMode::Force
        || (job.is_sub_health_fault() && job.sub_health_strategy == SubHealthStrategy::ForceExit);

    let mut plans = Vec::new();
    for task in &job.fault_tasks {
        match decide_task(task, eligible, config, now) {
            TaskDecision::Skip => continue,
            TaskDecision::Evaluate => {
                outcome.graced.push(task.task_uid.clone());
                continue;
            }
            TaskDecision::Proceed => {}
        }
        let Some(record) = live.tasks.iter().find(|t| t.task_uid == task.task_uid) else {
            // Missing from the live job: already restarted, nothing to evict.
            continue;
        };
        let grace_timed_out = task.is_being_graceful_deleted
            && now - task.grace_deleted_at >= config.grace_delete_timeout_secs;
        let path = if force_job || grace_timed_out {
            DeletePath::Force
        } else {
            DeletePath::Grace
        };
        plans.push(DeletePlan {
            task_uid: task.task_uid.clone(),
            pod_name: record.pod_name.clone(),
            pod_uid: record.pod_uid.clone(),
            namespace: record.namespace.clone(),
            path,
        });
    }

    if plans.is_empty() {
        return outcome;
    }

    let batches = plans
        .chunks(config.delete_batch_size)
        .map(|batch| run_batch(batch, job, session, deleter, config));
    let results: Vec<_> = join_all(batches).await.into_iter().flatten().collect();

    for (plan, result) in results {
        match result {
            Ok(()) => {
                info!(
                    job = %job.job_name,
                    pod = %plan.pod_name,
                    path = ?plan.path,
                    "evicted task"
                );
                if plan.path == DeletePath::Grace {
                    outcome.graced.push(plan.task_uid.clone());
                    if let Some(task) = job
                        .fault_tasks
                        .iter_mut()
                        .find(|t| t.task_uid == plan.task_uid)
                    {
                        task.is_being_graceful_deleted = true;
                        task.grace_deleted_at = now;
                    }
                }
                outcome.deleted.push(plan.task_uid);
            }
            Err(e) => {
                warn!(
                    job = %job.job_name,
                    pod = %plan.pod_name,
                    error = %e,
                    "task eviction failed, job stays un-executed"
                );
                outcome.failed.push(plan.task_uid);
            }
        }
    }
    outcome
}

/// Run one batch of deletions concurrently, returning each plan with its
/// result.
async fn run_batch(
    batch: &[DeletePlan],
    job: &FaultJob,
    session: &dyn SessionHandle,
    deleter: &dyn PodDeleter,
    config: &EngineConfig,
) -> Vec<(DeletePlan, crate::Result<()>)> {
    let tasks = batch.iter().map(|plan| async move {
        let result = match plan.path {
            DeletePath::Grace => {
                // The session evict is the gate: it fails when the task has
                // already left the session. Only then does the pod go away,
                // cooperatively.
                match session
                    .evict_task(&job.job_uid, &plan.task_uid, "fault rescheduling")
                    .await
                {
                    Ok(()) => {
                        deleter
                            .delete_pod(
                                &plan.namespace,
                                &plan.pod_name,
                                Some(&plan.pod_uid),
                                Some(config.grace_period_secs),
                            )
                            .await
                    }
                    Err(e) => Err(e),
                }
            }
            DeletePath::Force => {
                // Force deletes bypass session bookkeeping and the grace
                // period entirely.
                deleter
                    .delete_pod(&plan.namespace, &plan.pod_name, Some(&plan.pod_uid), Some(0))
                    .await
            }
        };
        (plan.clone(), result)
    });
    join_all(tasks).await
}
