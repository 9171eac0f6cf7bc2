// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Append-only reschedule history, newest record first.

use serde::{Deserialize, Serialize};

use super::FaultKind;

/// Why one task was restarted, as recorded in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskFaultCause {
    pub task: String,
    pub node: String,
    pub kind: FaultKind,
}

/// One executed restart of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RescheduleRecord {
    pub restarted_at: i64,
    pub reasons: Vec<TaskFaultCause>,
}

/// Bounded reschedule history for one job. Records are ordered newest first;
/// the persisted form of the whole history map is additionally truncated
/// under a byte budget, but a job's single most recent record is never
/// dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RescheduleHistory {
    #[serde(rename = "JobID")]
    pub job_id: String,
    pub total_reschedule_times: u32,
    /// Newest first.
    pub reschedule_records: Vec<RescheduleRecord>,
    #[serde(default)]
    pub additional_info: String,
}

impl RescheduleHistory {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            ..Default::default()
        }
    }

    /// Prepend a record and enforce the per-job record cap.
    pub fn prepend(&mut self, record: RescheduleRecord, cap: usize) {
        self.reschedule_records.insert(0, record);
        self.reschedule_records.truncate(cap.max(1));
        self.total_reschedule_times += 1;
    }

    /// Drop the oldest record, refusing to drop the last remaining one.
    /// Returns whether a record was dropped.
    pub fn drop_oldest(&mut self) -> bool {
        if self.reschedule_records.len() > 1 {
            self.reschedule_records.pop();
            true
        } else {
            false
        }
    }
}
