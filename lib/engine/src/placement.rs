// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Scoring and admission callbacks handed to the embedding scheduler.
//!
//! The engine never places tasks itself; it only vetoes nodes and penalizes
//! repeat placements so the placement logic steers rescheduled tasks away
//! from their fault history.

use std::collections::HashMap;

use crate::cache::FaultCache;
use crate::model::NodeRankOccurrence;

/// Reduce the score of candidate nodes this job previously faulted on.
pub fn penalize_history(
    occurrences: &[NodeRankOccurrence],
    scores: &mut HashMap<String, f64>,
    penalty: f64,
) {
    for occurrence in occurrences.iter().filter(|o| o.is_fault) {
        if let Some(score) = scores.get_mut(&occurrence.node_name) {
            *score -= penalty;
        }
    }
}

/// Admission predicate for one candidate node.
///
/// Rejects cached fault nodes outright, and healthy nodes still exclusively
/// reserved by another job whose rescheduling is in progress (its
/// rank-occurrence list pins the node until its restart is confirmed).
pub fn admit(cache: &FaultCache, job_uid: &str, node_name: &str) -> bool {
    if cache.is_fault_node(node_name) {
        return false;
    }
    for (owner, occurrences) in &cache.occurrences {
        if owner == job_uid {
            continue;
        }
        if occurrences.iter().any(|o| o.node_name == node_name) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FaultNode, NodeHealthState};

    #[test]
    fn test_penalty_applies_only_to_fault_placements() {
        let occurrences = vec![
            NodeRankOccurrence {
                node_name: "node-0".to_string(),
                rank_index: 0,
                is_fault: true,
            },
            NodeRankOccurrence {
                node_name: "node-1".to_string(),
                rank_index: 1,
                is_fault: false,
            },
        ];
        let mut scores = HashMap::from([
            ("node-0".to_string(), 100.0),
            ("node-1".to_string(), 100.0),
        ]);
        penalize_history(&occurrences, &mut scores, 64.0);
        assert_eq!(scores["node-0"], 36.0);
        assert_eq!(scores["node-1"], 100.0);
    }

    #[test]
    fn test_admit_rejects_fault_and_reserved_nodes() {
        let mut cache = FaultCache::new();
        cache.nodes.insert(
            "bad-node".to_string(),
            FaultNode {
                node_name: "bad-node".to_string(),
                is_fault_node: true,
                node_health_state: NodeHealthState::Unhealthy,
                ..Default::default()
            },
        );
        cache.occurrences.insert(
            "other-job".to_string(),
            vec![NodeRankOccurrence {
                node_name: "reserved-node".to_string(),
                rank_index: 3,
                is_fault: false,
            }],
        );

        assert!(!admit(&cache, "my-job", "bad-node"));
        assert!(!admit(&cache, "my-job", "reserved-node"));
        // The reserving job itself may come back to its node.
        assert!(admit(&cache, "other-job", "reserved-node"));
        assert!(admit(&cache, "my-job", "free-node"));
    }
}
