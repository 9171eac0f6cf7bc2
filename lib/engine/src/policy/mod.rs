// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Escalation policy engine.
//!
//! Per fault job, the pending-session counter widens the set of tasks
//! eligible for eviction: the fault tasks alone, then whole topology blocks,
//! then whole superpods, then the entire job. A job whose rank-0 task is
//! fault, or shares a block or superpod with a fault task, is master-fault
//! and treated as whole-job immediately. The eligible set is monotone in the
//! counter: escalation only ever widens scope until the restart is confirmed.

pub mod deletion;

use std::collections::{BTreeSet, HashMap};

use crate::config::EngineConfig;
use crate::model::{FaultJob, FaultTask};

/// Eviction scope for one job this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EscalationTier {
    /// Only tasks already marked fault.
    Single,
    /// All tasks sharing a topology block with a fault task.
    Block,
    /// All tasks sharing a superpod with a fault task.
    SuperPod,
    /// Every task of the job.
    WholeJob,
}

/// Tier from the pending-session counter alone.
pub fn tier_for(pending: u32, config: &EngineConfig) -> EscalationTier {
    if pending >= config.tier_job_sessions {
        EscalationTier::WholeJob
    } else if pending >= config.tier_superpod_sessions {
        EscalationTier::SuperPod
    } else if pending >= config.tier_block_sessions {
        EscalationTier::Block
    } else {
        EscalationTier::Single
    }
}

/// Advance the pending-session counter for one session.
///
/// Plain jobs count up once per session while not yet restarted. A job under
/// process recovery holds at the configured reset value while the platform
/// reports recovery failure, and fast-forwards to the configured resume value
/// once recovery reports healthy again.
pub fn advance_pending(
    pending: u32,
    process_recovery: bool,
    recovery_failed: bool,
    config: &EngineConfig,
) -> u32 {
    if !process_recovery {
        return pending.saturating_add(1);
    }
    if recovery_failed {
        return config.recovery_reset_sessions;
    }
    if pending < config.recovery_resume_sessions {
        config.recovery_resume_sessions
    } else {
        pending.saturating_add(1)
    }
}

/// Blocks containing at least one fault task.
fn fault_blocks(job: &FaultJob, config: &EngineConfig) -> BTreeSet<i64> {
    job.fault_tasks
        .iter()
        .filter(|t| t.is_fault_task)
        .filter_map(|t| t.block(config.block_size))
        .collect()
}

/// Superpods containing at least one fault task.
fn fault_superpods(job: &FaultJob, node_superpod: &HashMap<String, String>) -> BTreeSet<String> {
    job.fault_tasks
        .iter()
        .filter(|t| t.is_fault_task && !t.node_name.is_empty())
        .filter_map(|t| node_superpod.get(&t.node_name).cloned())
        .collect()
}

fn task_superpod<'a>(
    task: &FaultTask,
    node_superpod: &'a HashMap<String, String>,
) -> Option<&'a String> {
    if task.node_name.is_empty() {
        return None;
    }
    node_superpod.get(&task.node_name)
}

/// A job is master-fault when its rank-0 task is itself fault or shares a
/// block or superpod with one, regardless of the pending counter.
pub fn is_master_fault(
    job: &FaultJob,
    config: &EngineConfig,
    node_superpod: &HashMap<String, String>,
) -> bool {
    let Some(rank_zero) = job.rank_zero() else {
        return false;
    };
    if rank_zero.is_fault_task {
        return true;
    }
    if let Some(block) = rank_zero.block(config.block_size) {
        if fault_blocks(job, config).contains(&block) {
            return true;
        }
    }
    if let Some(superpod) = task_superpod(rank_zero, node_superpod) {
        if fault_superpods(job, node_superpod).contains(superpod) {
            return true;
        }
    }
    false
}

/// Tier actually applied this session: master fault overrides the counter.
pub fn effective_tier(
    job: &FaultJob,
    config: &EngineConfig,
    node_superpod: &HashMap<String, String>,
) -> EscalationTier {
    if job.is_master_fault || is_master_fault(job, config, node_superpod) {
        return EscalationTier::WholeJob;
    }
    tier_for(job.pending_session_num, config)
}

/// Task UIDs eligible for eviction under the given tier.
///
/// Monotone: each tier's set contains the previous tier's.
pub fn eligible_tasks(
    job: &FaultJob,
    tier: EscalationTier,
    config: &EngineConfig,
    node_superpod: &HashMap<String, String>,
) -> BTreeSet<String> {
    let blocks = fault_blocks(job, config);
    let superpods = fault_superpods(job, node_superpod);

    job.fault_tasks
        .iter()
        .filter(|task| match tier {
            EscalationTier::Single => task.is_fault_task,
            EscalationTier::Block => {
                task.is_fault_task
                    || task
                        .block(config.block_size)
                        .is_some_and(|b| blocks.contains(&b))
            }
            EscalationTier::SuperPod => {
                task.is_fault_task
                    || task
                        .block(config.block_size)
                        .is_some_and(|b| blocks.contains(&b))
                    || task_superpod(task, node_superpod).is_some_and(|s| superpods.contains(s))
            }
            EscalationTier::WholeJob => true,
        })
        .map(|task| task.task_uid.clone())
        .collect()
}

/// Three-state eviction decision for one task, consumed by the deletion
/// executor. Each tier is testable through this function in isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskDecision {
    /// Not in scope this session; leave the task alone.
    Skip,
    /// In scope, but a grace delete is already in flight and has not timed
    /// out; keep watching.
    Evaluate,
    /// Evict now.
    Proceed,
}

pub fn decide_task(
    task: &FaultTask,
    eligible: &BTreeSet<String>,
    config: &EngineConfig,
    now: i64,
) -> TaskDecision {
    if !eligible.contains(&task.task_uid) {
        return TaskDecision::Skip;
    }
    if task.is_being_graceful_deleted {
        let timed_out = now - task.grace_deleted_at >= config.grace_delete_timeout_secs;
        if !timed_out {
            return TaskDecision::Evaluate;
        }
    }
    TaskDecision::Proceed
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn task(uid: &str, rank: i64, node: &str, fault: bool) -> FaultTask {
        FaultTask {
            task_uid: uid.to_string(),
            task_name: uid.to_string(),
            node_name: node.to_string(),
            node_rank_index: rank,
            is_fault_task: fault,
            ..Default::default()
        }
    }

    /// Job of 8 ranks over 4 nodes, one fault task at the given rank.
    fn job_with_fault_rank(fault_rank: i64) -> FaultJob {
        FaultJob {
            job_uid: "j-0".to_string(),
            is_fault_job: true,
            fault_tasks: (0..8)
                .map(|r| {
                    task(
                        &format!("t-{r}"),
                        r,
                        &format!("node-{}", r / 2),
                        r == fault_rank,
                    )
                })
                .collect(),
            ..Default::default()
        }
    }

    fn superpods() -> HashMap<String, String> {
        // node-0,node-1 in sp-a; node-2,node-3 in sp-b.
        HashMap::from([
            ("node-0".to_string(), "sp-a".to_string()),
            ("node-1".to_string(), "sp-a".to_string()),
            ("node-2".to_string(), "sp-b".to_string()),
            ("node-3".to_string(), "sp-b".to_string()),
        ])
    }

    fn config_with_block(block_size: u32) -> EngineConfig {
        EngineConfig {
            block_size,
            ..Default::default()
        }
    }

    #[rstest]
    #[case(0, EscalationTier::Single)]
    #[case(4, EscalationTier::Single)]
    #[case(5, EscalationTier::Block)]
    #[case(9, EscalationTier::Block)]
    #[case(10, EscalationTier::SuperPod)]
    #[case(15, EscalationTier::WholeJob)]
    fn test_tier_boundaries(#[case] pending: u32, #[case] expected: EscalationTier) {
        assert_eq!(tier_for(pending, &EngineConfig::default()), expected);
    }

    #[test]
    fn test_block_tier_expands_to_same_block_only() {
        // Block size 2: ranks {2,3} form block 1. Fault at rank 3.
        let config = config_with_block(2);
        let job = job_with_fault_rank(3);

        let single = eligible_tasks(&job, EscalationTier::Single, &config, &superpods());
        assert_eq!(single, BTreeSet::from(["t-3".to_string()]));

        // Below the block threshold, rank 0 (block 0) is not eligible.
        assert!(!single.contains("t-0"));

        let block = eligible_tasks(&job, EscalationTier::Block, &config, &superpods());
        assert!(block.contains("t-2"), "same-block task becomes eligible");
        assert!(block.contains("t-3"));
        assert!(!block.contains("t-0"), "different-block task stays out");
    }

    #[test]
    fn test_superpod_tier_expands_to_same_superpod() {
        let config = config_with_block(2);
        // Fault at rank 7 -> node-3 -> sp-b. Ranks 4..8 live on node-2/node-3.
        let job = job_with_fault_rank(7);

        let superpod = eligible_tasks(&job, EscalationTier::SuperPod, &config, &superpods());
        for rank in 4..8 {
            assert!(superpod.contains(&format!("t-{rank}")), "rank {rank} in sp-b");
        }
        assert!(!superpod.contains("t-0"), "sp-a tasks stay out");
    }

    #[test]
    fn test_eligible_set_is_monotone_in_pending() {
        let config = config_with_block(2);
        let job = job_with_fault_rank(5);
        let pods = superpods();

        let mut previous: BTreeSet<String> = BTreeSet::new();
        for pending in 0..20 {
            let tier = tier_for(pending, &config);
            let current = eligible_tasks(&job, tier, &config, &pods);
            assert!(
                current.is_superset(&previous),
                "pending {pending} shrank the eligible set"
            );
            previous = current;
        }
    }

    #[test]
    fn test_master_fault_on_rank_zero() {
        let config = config_with_block(2);
        let job = job_with_fault_rank(0);
        assert!(is_master_fault(&job, &config, &superpods()));
        assert_eq!(
            effective_tier(&job, &config, &superpods()),
            EscalationTier::WholeJob
        );
    }

    #[test]
    fn test_master_fault_on_shared_block_with_rank_zero() {
        let config = config_with_block(2);
        // Rank 1 shares block 0 with rank 0.
        let job = job_with_fault_rank(1);
        assert!(is_master_fault(&job, &config, &superpods()));
    }

    #[test]
    fn test_no_master_fault_for_distant_fault() {
        // Block size 2 and fault in sp-b: rank 0 (node-0, sp-a) shares nothing.
        let config = config_with_block(2);
        let job = job_with_fault_rank(7);
        assert!(!is_master_fault(&job, &config, &superpods()));
        assert_eq!(
            effective_tier(&job, &config, &superpods()),
            EscalationTier::Single
        );
    }

    #[test]
    fn test_advance_pending_counts_and_recovers() {
        let config = EngineConfig::default();

        assert_eq!(advance_pending(3, false, false, &config), 4);
        // Recovery failure pins the counter at the reset value.
        assert_eq!(advance_pending(7, true, true, &config), 1);
        // Recovery healthy again: fast-forward to the resume value.
        assert_eq!(advance_pending(1, true, false, &config), 5);
        // Past the resume value, counting proceeds normally.
        assert_eq!(advance_pending(6, true, false, &config), 7);
    }

    #[test]
    fn test_decide_task_three_states() {
        let config = EngineConfig::default();
        let eligible = BTreeSet::from(["t-1".to_string()]);

        let outside = task("t-9", 9, "node-0", false);
        assert_eq!(
            decide_task(&outside, &eligible, &config, 1000),
            TaskDecision::Skip
        );

        let fresh = task("t-1", 1, "node-0", true);
        assert_eq!(
            decide_task(&fresh, &eligible, &config, 1000),
            TaskDecision::Proceed
        );

        let mut graceful = task("t-1", 1, "node-0", true);
        graceful.is_being_graceful_deleted = true;
        graceful.grace_deleted_at = 900;
        assert_eq!(
            decide_task(&graceful, &eligible, &config, 1000),
            TaskDecision::Evaluate
        );

        // Grace delete timed out: escalate to Proceed.
        graceful.grace_deleted_at = 0;
        assert_eq!(
            decide_task(&graceful, &eligible, &config, 1000),
            TaskDecision::Proceed
        );
    }
}
