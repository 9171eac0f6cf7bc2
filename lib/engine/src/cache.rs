// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The process-wide fault cache.
//!
//! Held as an explicit context object owned by the session reconciler, never
//! as global state. Exactly one writer exists per scheduling session; between
//! sessions the cache is read-only. Entities are stored by identifier in
//! owned maps, never by reference into a slice being rebuilt.

use std::collections::HashMap;

use crate::model::{FaultJob, FaultNode, NodeRankOccurrence, RescheduleHistory, RetryBudget};

/// All cached fault state, keyed by node name and job UID.
#[derive(Debug, Clone, Default)]
pub struct FaultCache {
    pub nodes: HashMap<String, FaultNode>,
    pub jobs: HashMap<String, FaultJob>,
    pub budgets: HashMap<String, RetryBudget>,
    pub history: HashMap<String, RescheduleHistory>,
    pub occurrences: HashMap<String, Vec<NodeRankOccurrence>>,
}

impl FaultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fault_node(&self, node_name: &str) -> bool {
        self.nodes
            .get(node_name)
            .map(|n| n.is_fault_node)
            .unwrap_or(false)
    }

    /// Names of all currently-fault nodes, for marking onto the live view.
    pub fn fault_node_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .nodes
            .values()
            .filter(|n| n.is_fault_node)
            .map(|n| n.node_name.clone())
            .collect();
        names.sort();
        names
    }

    /// Resolve a live job to a cached entry: by UID first, then by the
    /// `(namespace, reference name)` fallback for elastic jobs whose UID
    /// changed between generations. Returns the cache key of the match.
    pub fn resolve_job(&self, uid: &str, namespace: &str, reference: &str) -> Option<String> {
        if self.jobs.contains_key(uid) {
            return Some(uid.to_string());
        }
        self.jobs
            .values()
            .find(|j| j.namespace == namespace && j.reference_name == reference)
            .map(|j| j.job_uid.clone())
    }

    /// Drop every trace of a job: fault entry, budget, occurrences. History
    /// is retained; it is bounded separately by the persistence byte budget.
    pub fn forget_job(&mut self, uid: &str) {
        self.jobs.remove(uid);
        self.budgets.remove(uid);
        self.occurrences.remove(uid);
    }
}
