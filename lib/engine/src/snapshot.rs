// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Persistence codec for the fault snapshot.
//!
//! The snapshot is one flat string-keyed map with one sub-value per fault
//! state kind. Kinds are a closed enumeration; the stable string keys are the
//! wire format. Decoding is tolerant per kind: a malformed sub-value is
//! skipped with a warning and that kind starts the cycle empty, never
//! aborting reconciliation. The history kind is written through the
//! size-bounded truncation in [`crate::budget`].

use std::collections::{BTreeMap, HashMap};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;
use xxhash_rust::xxh3::Xxh3;

use crate::budget::truncate_history;
use crate::cache::FaultCache;
use crate::config::EngineConfig;
use crate::model::{
    FaultJob, FaultNode, FaultNodeView, NodeRankOccurrence, RescheduleHistory, RetryBudget,
};

/// Partition of the persisted fault-job list by job topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPartition {
    Common,
    SuperPod,
}

/// Every fault-state kind the engine persists, with its stable wire key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    FaultNodes,
    FaultJobs(JobPartition),
    NodeHeartbeats,
    RetryBudgets,
    RescheduleHistory,
    RankOccurrences,
    IntegrityCode,
}

impl SnapshotKind {
    pub const fn key(&self) -> &'static str {
        match self {
            SnapshotKind::FaultNodes => "fault-node-list",
            SnapshotKind::FaultJobs(JobPartition::Common) => "fault-job-list",
            SnapshotKind::FaultJobs(JobPartition::SuperPod) => "superpod-fault-job-list",
            SnapshotKind::NodeHeartbeats => "node-heartbeat",
            SnapshotKind::RetryBudgets => "remain-retry-times",
            SnapshotKind::RescheduleHistory => "reschedule-reasons",
            SnapshotKind::RankOccurrences => "node-rank-occurrence-map",
            SnapshotKind::IntegrityCode => "integrity-check-code",
        }
    }

    /// Every key the engine owns in the persisted object.
    pub const ALL: [SnapshotKind; 8] = [
        SnapshotKind::FaultNodes,
        SnapshotKind::FaultJobs(JobPartition::Common),
        SnapshotKind::FaultJobs(JobPartition::SuperPod),
        SnapshotKind::NodeHeartbeats,
        SnapshotKind::RetryBudgets,
        SnapshotKind::RescheduleHistory,
        SnapshotKind::RankOccurrences,
        SnapshotKind::IntegrityCode,
    ];
}

impl std::fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Per-node heartbeat entry, persisted separately from the fault list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeHeartbeat {
    pub node_name: String,
    pub heartbeat_time: i64,
    pub update_time: i64,
}

/// Encode the cache into the string map the engine owns, truncating the
/// history kind under its byte budget and stamping the integrity code.
pub fn encode(cache: &mut FaultCache, config: &EngineConfig) -> BTreeMap<String, String> {
    truncate_history(&mut cache.history, config);

    let mut entries = BTreeMap::new();

    let mut fault_nodes: Vec<FaultNodeView> = cache
        .nodes
        .values()
        .filter(|n| n.is_fault_node || n.has_sub_health())
        .map(FaultNodeView::from)
        .collect();
    fault_nodes.sort_by(|a, b| a.node_name.cmp(&b.node_name));
    insert_kind(&mut entries, SnapshotKind::FaultNodes, &fault_nodes);

    // Only real-fault jobs are persisted; purely sub-health jobs are not.
    let mut common: Vec<&FaultJob> = Vec::new();
    let mut superpod: Vec<&FaultJob> = Vec::new();
    for job in cache.jobs.values() {
        if !job.is_fault_job || job.is_sub_health_fault() {
            continue;
        }
        if job.uses_superpod {
            superpod.push(job);
        } else {
            common.push(job);
        }
    }
    common.sort_by(|a, b| a.job_uid.cmp(&b.job_uid));
    superpod.sort_by(|a, b| a.job_uid.cmp(&b.job_uid));
    insert_kind(&mut entries, SnapshotKind::FaultJobs(JobPartition::Common), &common);
    insert_kind(
        &mut entries,
        SnapshotKind::FaultJobs(JobPartition::SuperPod),
        &superpod,
    );

    let mut heartbeats: Vec<NodeHeartbeat> = cache
        .nodes
        .values()
        .map(|n| NodeHeartbeat {
            node_name: n.node_name.clone(),
            heartbeat_time: n.heartbeat,
            update_time: n.heartbeat_updated_at,
        })
        .collect();
    heartbeats.sort_by(|a, b| a.node_name.cmp(&b.node_name));
    insert_kind(&mut entries, SnapshotKind::NodeHeartbeats, &heartbeats);

    let budgets: BTreeMap<&String, &RetryBudget> = cache.budgets.iter().collect();
    insert_kind(&mut entries, SnapshotKind::RetryBudgets, &budgets);

    let history: BTreeMap<&String, &RescheduleHistory> = cache.history.iter().collect();
    insert_kind(&mut entries, SnapshotKind::RescheduleHistory, &history);

    let occurrences: BTreeMap<&String, &Vec<NodeRankOccurrence>> =
        cache.occurrences.iter().collect();
    insert_kind(&mut entries, SnapshotKind::RankOccurrences, &occurrences);

    let code = integrity_code(&entries);
    entries.insert(SnapshotKind::IntegrityCode.key().to_string(), code);
    entries
}

/// Rebuild the cache from a persisted string map, tolerating per-kind decode
/// failures and an integrity mismatch.
pub fn decode(entries: &BTreeMap<String, String>) -> FaultCache {
    verify_integrity(entries);

    let mut cache = FaultCache::new();

    let views: Vec<FaultNodeView> = decode_kind(entries, SnapshotKind::FaultNodes);
    for view in views {
        cache.nodes.insert(view.node_name.clone(), view.into());
    }

    for partition in [JobPartition::Common, JobPartition::SuperPod] {
        let jobs: Vec<FaultJob> = decode_kind(entries, SnapshotKind::FaultJobs(partition));
        for job in jobs {
            cache.jobs.insert(job.job_uid.clone(), job);
        }
    }

    let heartbeats: Vec<NodeHeartbeat> = decode_kind(entries, SnapshotKind::NodeHeartbeats);
    for hb in heartbeats {
        let node = cache
            .nodes
            .entry(hb.node_name.clone())
            .or_insert_with(|| FaultNode::new(hb.node_name.clone(), hb.update_time));
        node.heartbeat = hb.heartbeat_time;
        node.heartbeat_updated_at = hb.update_time;
    }

    cache.budgets = decode_kind::<HashMap<String, RetryBudget>>(entries, SnapshotKind::RetryBudgets);
    cache.history =
        decode_kind::<HashMap<String, RescheduleHistory>>(entries, SnapshotKind::RescheduleHistory);
    cache.occurrences = decode_kind::<HashMap<String, Vec<NodeRankOccurrence>>>(
        entries,
        SnapshotKind::RankOccurrences,
    );

    cache
}

fn insert_kind<T: Serialize>(entries: &mut BTreeMap<String, String>, kind: SnapshotKind, value: &T) {
    match serde_json::to_string(value) {
        Ok(encoded) => {
            entries.insert(kind.key().to_string(), encoded);
        }
        Err(e) => {
            // Serialization of owned in-memory state should never fail; if it
            // does, drop the kind for this write rather than the whole cycle.
            warn!(kind = %kind, error = %e, "failed to encode snapshot kind");
        }
    }
}

fn decode_kind<T: DeserializeOwned + Default>(
    entries: &BTreeMap<String, String>,
    kind: SnapshotKind,
) -> T {
    let Some(raw) = entries.get(kind.key()) else {
        return T::default();
    };
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            let err = crate::error::EngineError::Decode { kind, source: e };
            warn!(error = %err, "skipping snapshot kind for this cycle");
            T::default()
        }
    }
}

/// Hash of every owned sub-value (except the code itself) in key order.
pub fn integrity_code(entries: &BTreeMap<String, String>) -> String {
    let mut hasher = Xxh3::new();
    for (key, value) in entries {
        if key == SnapshotKind::IntegrityCode.key() {
            continue;
        }
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:016x}", hasher.digest())
}

fn verify_integrity(entries: &BTreeMap<String, String>) {
    let Some(stored) = entries.get(SnapshotKind::IntegrityCode.key()) else {
        return;
    };
    let computed = integrity_code(entries);
    if stored != &computed {
        warn!(%stored, %computed, "snapshot integrity code mismatch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FaultKind, NodeHealthState, RescheduleRecord, TaskFaultCause};

    fn populated_cache() -> FaultCache {
        let mut cache = FaultCache::new();
        cache.nodes.insert(
            "node-0".to_string(),
            FaultNode {
                node_name: "node-0".to_string(),
                all_cards: vec!["Ascend910-0".to_string()],
                unhealthy_npu: vec!["Ascend910-0".to_string()],
                is_fault_node: true,
                node_health_state: NodeHealthState::CardUnhealthy,
                heartbeat: 12,
                heartbeat_updated_at: 40,
                reported_at: 50,
                ..Default::default()
            },
        );
        cache.nodes.insert(
            "node-1".to_string(),
            FaultNode::new("node-1", 50),
        );
        cache.jobs.insert(
            "j-0".to_string(),
            FaultJob {
                job_uid: "j-0".to_string(),
                job_name: "train".to_string(),
                is_fault_job: true,
                fault_kinds: vec![FaultKind::CardUnhealthy],
                ..Default::default()
            },
        );
        cache.jobs.insert(
            "j-sp".to_string(),
            FaultJob {
                job_uid: "j-sp".to_string(),
                is_fault_job: true,
                fault_kinds: vec![FaultKind::NodeUnhealthy],
                uses_superpod: true,
                ..Default::default()
            },
        );
        cache
            .budgets
            .insert("j-0".to_string(), RetryBudget::new("gen-1", 2));
        let mut history = RescheduleHistory::new("j-0");
        history.prepend(
            RescheduleRecord {
                restarted_at: 99,
                reasons: vec![TaskFaultCause {
                    task: "worker-0".to_string(),
                    node: "node-0".to_string(),
                    kind: FaultKind::CardUnhealthy,
                }],
            },
            5,
        );
        cache.history.insert("j-0".to_string(), history);
        cache.occurrences.insert(
            "j-0".to_string(),
            vec![NodeRankOccurrence {
                node_name: "node-0".to_string(),
                rank_index: 0,
                is_fault: true,
            }],
        );
        cache
    }

    #[test]
    fn test_round_trip_preserves_every_kind() {
        let mut cache = populated_cache();
        let entries = encode(&mut cache, &EngineConfig::default());
        let decoded = decode(&entries);

        // Fault node comes back; internal reported_at does not survive the
        // external view, heartbeats do via their own kind.
        let node = decoded.nodes.get("node-0").unwrap();
        assert!(node.is_fault_node);
        assert_eq!(node.node_health_state, NodeHealthState::CardUnhealthy);
        assert_eq!(node.heartbeat, 12);
        assert_eq!(node.heartbeat_updated_at, 40);

        // Healthy node survives through the heartbeat kind alone.
        assert!(decoded.nodes.contains_key("node-1"));
        assert!(!decoded.nodes.get("node-1").unwrap().is_fault_node);

        assert_eq!(decoded.jobs.get("j-0").unwrap().job_name, "train");
        assert!(decoded.jobs.get("j-sp").unwrap().uses_superpod);
        assert_eq!(decoded.budgets, cache.budgets);
        assert_eq!(decoded.history, cache.history);
        assert_eq!(decoded.occurrences, cache.occurrences);
    }

    #[test]
    fn test_partitions_split_superpod_jobs() {
        let mut cache = populated_cache();
        let entries = encode(&mut cache, &EngineConfig::default());

        let common = entries.get("fault-job-list").unwrap();
        let superpod = entries.get("superpod-fault-job-list").unwrap();
        assert!(common.contains("j-0") && !common.contains("j-sp"));
        assert!(superpod.contains("j-sp") && !superpod.contains("j-0"));
    }

    #[test]
    fn test_sub_health_only_jobs_are_not_persisted() {
        let mut cache = FaultCache::new();
        cache.jobs.insert(
            "j-sub".to_string(),
            FaultJob {
                job_uid: "j-sub".to_string(),
                is_fault_job: true,
                fault_kinds: vec![FaultKind::CardSubHealthy],
                ..Default::default()
            },
        );
        let entries = encode(&mut cache, &EngineConfig::default());
        assert_eq!(entries.get("fault-job-list").unwrap(), "[]");
    }

    #[test]
    fn test_malformed_kind_decodes_empty_without_poisoning_others() {
        let mut cache = populated_cache();
        let mut entries = encode(&mut cache, &EngineConfig::default());
        entries.insert(
            SnapshotKind::RetryBudgets.key().to_string(),
            "{not json".to_string(),
        );

        let decoded = decode(&entries);
        assert!(decoded.budgets.is_empty());
        assert!(!decoded.jobs.is_empty());
        assert!(!decoded.nodes.is_empty());
    }

    #[test]
    fn test_integrity_code_tracks_content() {
        let mut cache = populated_cache();
        let entries = encode(&mut cache, &EngineConfig::default());
        let stored = entries.get("integrity-check-code").unwrap().clone();
        assert_eq!(stored, integrity_code(&entries));

        let mut tampered = entries.clone();
        tampered.insert("fault-job-list".to_string(), "[]".to_string());
        assert_ne!(stored, integrity_code(&tampered));
    }

    #[test]
    fn test_missing_object_decodes_to_empty_cache() {
        let cache = decode(&BTreeMap::new());
        assert!(cache.nodes.is_empty());
        assert!(cache.jobs.is_empty());
    }
}
