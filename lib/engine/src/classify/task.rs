// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Task and job fault classification.
//!
//! A task is fault if its node is a fault node (hard-unhealthy, or one of its
//! used accelerators is), if its pod terminated in failure and the retry
//! budget still allows escalation, or if sub-health is present and the job's
//! strategy is not "ignore". A task with no node assignment yet is always
//! healthy. A job is fault iff at least one of its tasks is.

use std::collections::{BTreeSet, HashMap};

use crate::cluster::{JobRecord, PodPhase, TaskRecord};
use crate::config::EngineConfig;
use crate::model::{
    FaultJob, FaultKind, FaultNode, FaultReason, FaultTask, NodeHealthState, RetryBudget,
    SubHealthStrategy,
};

/// Classify one live task against the cached node state.
pub fn classify_task(
    task: &TaskRecord,
    nodes: &HashMap<String, FaultNode>,
    strategy: SubHealthStrategy,
    pod_failure_allowed: bool,
    prior: Option<&FaultTask>,
) -> FaultTask {
    let mut reasons = Vec::new();

    // An unscheduled task has nothing to evict yet.
    if !task.node_name.is_empty() {
        if let Some(node) = nodes.get(&task.node_name) {
            if node.node_health_state == NodeHealthState::Unhealthy {
                reasons.push(FaultReason::new(
                    FaultKind::NodeUnhealthy,
                    format!("node {} is unhealthy", node.node_name),
                ));
            }
            for card in &task.used_cards {
                if node.is_card_unhealthy(card) {
                    reasons.push(FaultReason::for_card(
                        FaultKind::CardUnhealthy,
                        card.clone(),
                        format!("card {card} is unhealthy"),
                    ));
                } else if node.is_card_network_unhealthy(card) {
                    reasons.push(FaultReason::for_card(
                        FaultKind::CardNetworkUnhealthy,
                        card.clone(),
                        format!("card {card} is network-unhealthy"),
                    ));
                }
            }
            if strategy != SubHealthStrategy::Ignore {
                if node.has_card_sub_health_fault {
                    reasons.push(FaultReason::new(
                        FaultKind::CardSubHealthy,
                        format!("node {} reports card sub-health", node.node_name),
                    ));
                }
                if node.has_switch_sub_health_fault {
                    reasons.push(FaultReason::new(
                        FaultKind::SwitchSubHealthy,
                        format!("node {} reports switch sub-health", node.node_name),
                    ));
                }
            }
        }

        if task.pod_phase == PodPhase::Failed && pod_failure_allowed {
            reasons.push(FaultReason::new(
                FaultKind::PodFailed,
                format!("pod {} terminated in failure", task.pod_name),
            ));
        }
    }

    FaultTask {
        task_uid: task.task_uid.clone(),
        task_name: task.task_name.clone(),
        node_name: task.node_name.clone(),
        node_rank_index: task.rank_index,
        use_card_name: task.used_cards.clone(),
        is_fault_task: !reasons.is_empty(),
        fault_kind: reasons.first().map(|r| r.kind),
        reasons,
        is_being_graceful_deleted: prior.map(|p| p.is_being_graceful_deleted).unwrap_or(false),
        grace_deleted_at: prior.map(|p| p.grace_deleted_at).unwrap_or(0),
    }
}

/// Classify a whole live job, merging against its prior cached entry.
///
/// Counters and execution flags (`pending_session_num`, `delete_executed`,
/// `created_at`) carry over from the prior entry; everything derived from the
/// live view is rebuilt.
pub fn classify_job(
    record: &JobRecord,
    prior: Option<&FaultJob>,
    nodes: &HashMap<String, FaultNode>,
    budget: Option<&RetryBudget>,
    config: &EngineConfig,
    now: i64,
) -> FaultJob {
    let strategy = record.sub_health_strategy();
    let retry_times = record.retry_times(config.default_retry_times);
    let pod_failure_allowed = budget.map(|b| !b.exhausted()).unwrap_or(retry_times > 0);

    let fault_tasks: Vec<FaultTask> = record
        .tasks
        .iter()
        .map(|task| {
            let prior_task = prior.and_then(|p| p.fault_task(&task.task_uid));
            classify_task(task, nodes, strategy, pod_failure_allowed, prior_task)
        })
        .collect();

    let fault_kinds: Vec<FaultKind> = fault_tasks
        .iter()
        .filter(|t| t.is_fault_task)
        .flat_map(|t| t.reasons.iter().map(|r| r.kind))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let is_fault_job = fault_tasks.iter().any(|t| t.is_fault_task);
    debug_assert!(is_fault_job || fault_kinds.is_empty());

    let uses_superpod = prior.map(|p| p.uses_superpod).unwrap_or(false);
    let prior_executed = prior.map(|p| p.delete_executed).unwrap_or(false);
    // The fault episode runs from first fault through eviction to confirmed
    // restart; it only clears when the job is healthy with nothing in flight.
    let fault_since = if is_fault_job || prior_executed {
        prior
            .map(|p| p.fault_since)
            .filter(|t| *t > 0)
            .unwrap_or(now)
    } else {
        0
    };

    FaultJob {
        job_uid: record.uid.clone(),
        job_name: record.name.clone(),
        namespace: record.namespace.clone(),
        reference_name: record.reference_name.clone(),
        reschedule_mode: record.reschedule_mode(),
        is_fault_job,
        fault_tasks,
        fault_kinds,
        pending_session_num: prior.map(|p| p.pending_session_num).unwrap_or(0),
        delete_executed: prior.map(|p| p.delete_executed).unwrap_or(false),
        delete_executed_at: prior.map(|p| p.delete_executed_at).unwrap_or(0),
        sub_health_strategy: strategy,
        fault_retry_times: retry_times,
        generation: record.generation(),
        is_master_fault: prior.map(|p| p.is_master_fault).unwrap_or(false),
        uses_superpod,
        fault_since,
        created_at: prior.map(|p| p.created_at).unwrap_or(now),
        updated_at: now,
    }
}

/// Whether a fault job may be restarted at all this cycle.
///
/// Node and sub-health faults always allow a restart; a job whose only fault
/// is pod failure is blocked once its retry budget is exhausted. Budget
/// exhaustion is a policy outcome, not an error.
pub fn can_restart(job: &FaultJob, budget: Option<&RetryBudget>) -> bool {
    if !job.is_fault_job {
        return false;
    }
    if job.fault_kinds.iter().any(|k| *k != FaultKind::PodFailed) {
        return true;
    }
    budget
        .map(|b| !b.exhausted())
        .unwrap_or(job.fault_retry_times > 0)
}
