// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-job unconditional-retry budget.

use serde::{Deserialize, Serialize};

/// Remaining unconditional retries for one job generation.
///
/// Created on first fault classification, decremented on each executed
/// restart whose cause is a pod failure, and discarded when the job's
/// generation changes or the job leaves the live session. Node and sub-health
/// faults are never budget-gated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBudget {
    /// Generation identifier of the job this budget belongs to.
    #[serde(rename = "UUID")]
    pub generation: String,
    /// Remaining unconditional retries.
    #[serde(rename = "Times")]
    pub times: i32,
}

impl RetryBudget {
    pub fn new(generation: impl Into<String>, times: i32) -> Self {
        Self {
            generation: generation.into(),
            times,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.times <= 0
    }

    /// Charge one restart against the budget, saturating at zero.
    pub fn charge(&mut self) {
        self.times = (self.times - 1).max(0);
    }
}
