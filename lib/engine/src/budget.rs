// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Retry-budget and reschedule-history bookkeeping.
//!
//! Budgets gate only pod-failure-triggered restarts; node and sub-health
//! faults restart freely. The history map is append-only in memory and
//! truncated under a byte budget at persistence time: each truncation pass
//! drops the oldest record of every job that still has more than one, so a
//! job's single most recent record always survives.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::cluster::JobRecord;
use crate::config::EngineConfig;
use crate::model::{
    FaultJob, FaultKind, RescheduleHistory, RescheduleRecord, RetryBudget, TaskFaultCause,
};

/// Create a budget for a newly fault-classified job if none exists yet.
pub fn ensure_budget(
    budgets: &mut HashMap<String, RetryBudget>,
    job: &FaultJob,
) {
    budgets.entry(job.job_uid.clone()).or_insert_with(|| {
        debug!(job = %job.job_name, times = job.fault_retry_times, "seeding retry budget");
        RetryBudget::new(job.generation.clone(), job.fault_retry_times)
    });
}

/// Charge a job's budget for an executed restart whose cause includes a pod
/// failure. Node and sub-health causes are free.
pub fn charge_restart(budgets: &mut HashMap<String, RetryBudget>, job: &FaultJob) {
    if !job.fault_kinds.contains(&FaultKind::PodFailed) {
        return;
    }
    if let Some(budget) = budgets.get_mut(&job.job_uid) {
        budget.charge();
        info!(
            job = %job.job_name,
            remaining = budget.times,
            "charged retry budget for pod-failure restart"
        );
    }
}

/// Discard budgets whose job left the live session or changed generation.
pub fn reconcile_budgets(
    budgets: &mut HashMap<String, RetryBudget>,
    live_jobs: &HashMap<String, JobRecord>,
) {
    budgets.retain(|uid, budget| match live_jobs.get(uid) {
        Some(live) => {
            let same_generation = live.generation() == budget.generation;
            if !same_generation {
                debug!(job = %live.name, "generation changed, dropping retry budget");
            }
            same_generation
        }
        None => {
            debug!(job_uid = %uid, "job left session, dropping retry budget");
            false
        }
    });
}

/// Prepend a history record for one executed restart.
pub fn record_restart(
    history: &mut HashMap<String, RescheduleHistory>,
    job: &FaultJob,
    config: &EngineConfig,
    now: i64,
) {
    let reasons: Vec<TaskFaultCause> = job
        .fault_tasks
        .iter()
        .filter(|t| t.is_fault_task)
        .flat_map(|t| {
            t.reasons.iter().map(|r| TaskFaultCause {
                task: t.task_name.clone(),
                node: t.node_name.clone(),
                kind: r.kind,
            })
        })
        .collect();
    history
        .entry(job.job_uid.clone())
        .or_insert_with(|| RescheduleHistory::new(job.job_uid.clone()))
        .prepend(
            RescheduleRecord {
                restarted_at: now,
                reasons,
            },
            config.max_records_per_job,
        );
}

/// Shrink the history map until its serialized size fits the byte budget or
/// the iteration ceiling is reached. Returns the final serialized size.
///
/// Each pass drops the oldest record of every job holding more than one
/// record; the last remaining record of a job is never dropped.
pub fn truncate_history(
    history: &mut HashMap<String, RescheduleHistory>,
    config: &EngineConfig,
) -> usize {
    let mut size = serialized_size(history);
    let mut iterations = 0;
    while size > config.history_byte_budget && iterations < config.history_truncate_max_iters {
        let mut dropped = false;
        for entry in history.values_mut() {
            dropped |= entry.drop_oldest();
        }
        if !dropped {
            // Every job is down to its final record; nothing left to shed.
            break;
        }
        iterations += 1;
        size = serialized_size(history);
    }
    if size > config.history_byte_budget {
        warn!(
            size,
            budget = config.history_byte_budget,
            iterations,
            "reschedule history still over budget after truncation"
        );
    }
    size
}

fn serialized_size(history: &HashMap<String, RescheduleHistory>) -> usize {
    serde_json::to_vec(history).map(|v| v.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fault_job(uid: &str, kinds: &[FaultKind], retry: i32) -> FaultJob {
        FaultJob {
            job_uid: uid.to_string(),
            job_name: uid.to_string(),
            generation: format!("{uid}-gen"),
            is_fault_job: true,
            fault_kinds: kinds.to_vec(),
            fault_retry_times: retry,
            ..Default::default()
        }
    }

    #[test]
    fn test_ensure_budget_is_create_once() {
        let mut budgets = HashMap::new();
        let job = fault_job("j-0", &[FaultKind::PodFailed], 3);

        ensure_budget(&mut budgets, &job);
        budgets.get_mut("j-0").unwrap().charge();
        ensure_budget(&mut budgets, &job);

        assert_eq!(budgets.get("j-0").unwrap().times, 2);
    }

    #[test]
    fn test_charge_only_for_pod_failures() {
        let mut budgets = HashMap::new();
        let pod_failed = fault_job("j-0", &[FaultKind::PodFailed], 3);
        ensure_budget(&mut budgets, &pod_failed);
        charge_restart(&mut budgets, &pod_failed);
        assert_eq!(budgets.get("j-0").unwrap().times, 2);

        let node_fault = fault_job("j-1", &[FaultKind::NodeUnhealthy], 3);
        ensure_budget(&mut budgets, &node_fault);
        charge_restart(&mut budgets, &node_fault);
        assert_eq!(budgets.get("j-1").unwrap().times, 3);
    }

    #[test]
    fn test_reconcile_drops_gone_and_regenerated_jobs() {
        let mut budgets = HashMap::from([
            ("j-0".to_string(), RetryBudget::new("j-0-gen", 3)),
            ("j-1".to_string(), RetryBudget::new("old-gen", 3)),
            ("j-2".to_string(), RetryBudget::new("j-2-gen", 3)),
        ]);
        let mut live = HashMap::new();
        live.insert(
            "j-0".to_string(),
            JobRecord {
                uid: "j-0".to_string(),
                annotations: std::collections::BTreeMap::from([(
                    crate::cluster::GENERATION_ANNOTATION.to_string(),
                    "j-0-gen".to_string(),
                )]),
                ..Default::default()
            },
        );
        live.insert(
            "j-1".to_string(),
            JobRecord {
                uid: "j-1".to_string(),
                annotations: std::collections::BTreeMap::from([(
                    crate::cluster::GENERATION_ANNOTATION.to_string(),
                    "new-gen".to_string(),
                )]),
                ..Default::default()
            },
        );
        // j-2 left the session entirely.

        reconcile_budgets(&mut budgets, &live);
        assert!(budgets.contains_key("j-0"));
        assert!(!budgets.contains_key("j-1"));
        assert!(!budgets.contains_key("j-2"));
    }

    #[test]
    fn test_record_restart_collects_fault_causes() {
        use crate::model::{FaultReason, FaultTask};

        let mut history = HashMap::new();
        let mut job = fault_job("j-0", &[FaultKind::CardUnhealthy], 3);
        job.fault_tasks = vec![FaultTask {
            task_name: "worker-1".to_string(),
            node_name: "node-1".to_string(),
            is_fault_task: true,
            reasons: vec![FaultReason::for_card(
                FaultKind::CardUnhealthy,
                "Ascend910-2",
                "card Ascend910-2 is unhealthy",
            )],
            ..Default::default()
        }];

        record_restart(&mut history, &job, &EngineConfig::default(), 1234);
        let entry = history.get("j-0").unwrap();
        assert_eq!(entry.total_reschedule_times, 1);
        assert_eq!(entry.reschedule_records[0].restarted_at, 1234);
        assert_eq!(entry.reschedule_records[0].reasons[0].node, "node-1");
    }

    /// Oversized map shrinks under the budget and every job keeps at least
    /// its newest record.
    #[test]
    fn test_truncation_terminates_and_keeps_newest() {
        let mut history: HashMap<String, RescheduleHistory> = HashMap::new();
        let filler = "x".repeat(2000);
        for j in 0..100 {
            let mut entry = RescheduleHistory::new(format!("job-{j}"));
            for r in 0..10 {
                entry.prepend(
                    RescheduleRecord {
                        restarted_at: r,
                        reasons: vec![TaskFaultCause {
                            task: filler.clone(),
                            node: format!("node-{r}"),
                            kind: FaultKind::PodFailed,
                        }],
                    },
                    usize::MAX >> 1,
                );
            }
            history.insert(format!("job-{j}"), entry);
        }

        let config = EngineConfig {
            history_byte_budget: 950_000,
            ..Default::default()
        };
        assert!(serialized_size(&history) > config.history_byte_budget);

        let size = truncate_history(&mut history, &config);
        assert!(size <= config.history_byte_budget);
        for entry in history.values() {
            assert!(!entry.reschedule_records.is_empty());
            // Newest record (restarted_at == 9) survived.
            assert_eq!(entry.reschedule_records[0].restarted_at, 9);
        }
    }

    /// A map that cannot fit (every job already at one record) stops at the
    /// no-progress point instead of spinning to the iteration ceiling.
    #[test]
    fn test_truncation_stops_when_no_record_can_be_dropped() {
        let mut history: HashMap<String, RescheduleHistory> = HashMap::new();
        let filler = "x".repeat(10_000);
        let mut entry = RescheduleHistory::new("job-0");
        entry.prepend(
            RescheduleRecord {
                restarted_at: 0,
                reasons: vec![TaskFaultCause {
                    task: filler,
                    node: "node-0".to_string(),
                    kind: FaultKind::PodFailed,
                }],
            },
            10,
        );
        history.insert("job-0".to_string(), entry);

        let config = EngineConfig {
            history_byte_budget: 100,
            ..Default::default()
        };
        let size = truncate_history(&mut history, &config);
        assert!(size > config.history_byte_budget);
        assert_eq!(history.get("job-0").unwrap().reschedule_records.len(), 1);
    }
}
