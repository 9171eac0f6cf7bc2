// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Fault data model: the entities the engine tracks across scheduling
//! sessions and their invariants.

mod history;
mod job;
mod node;
mod occurrence;
mod retry;

pub use history::{RescheduleHistory, RescheduleRecord, TaskFaultCause};
pub use job::{
    FaultJob, FaultKind, FaultReason, FaultTask, JobKey, RescheduleMode, SubHealthStrategy,
};
pub use node::{CardFaultType, FaultCard, FaultNode, FaultNodeView, NodeHealthState};
pub use occurrence::NodeRankOccurrence;
pub use retry::RetryBudget;
