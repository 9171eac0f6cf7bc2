// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Rank-placement snapshots used to detect illegal rank re-use across
//! restarts.

use serde::{Deserialize, Serialize};

/// One `(node, rank)` placement recorded when a job's deletion has executed.
///
/// Cleared when the job is confirmed restarted and not re-faulted. A later
/// allocation that lands a rank back on a node recorded here with
/// `is_fault == true` is illegal re-use and is rejected by the admission
/// predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeRankOccurrence {
    pub node_name: String,
    pub rank_index: i64,
    pub is_fault: bool,
}
