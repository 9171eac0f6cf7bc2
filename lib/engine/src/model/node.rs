// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Node-level fault state.

use serde::{Deserialize, Serialize};

/// Health verdict for a node, derived once per session by the node classifier.
///
/// Invariant: a node with `is_fault_node == false` is always `Healthy`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeHealthState {
    #[default]
    Healthy,
    /// The node itself is down (nodeD or fabric verdict).
    Unhealthy,
    /// At least one accelerator is hard-unhealthy.
    CardUnhealthy,
    /// At least one accelerator lost its fabric links but is otherwise up.
    CardNetworkUnhealthy,
}

impl std::fmt::Display for NodeHealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeHealthState::Healthy => write!(f, "Healthy"),
            NodeHealthState::Unhealthy => write!(f, "Unhealthy"),
            NodeHealthState::CardUnhealthy => write!(f, "CardUnhealthy"),
            NodeHealthState::CardNetworkUnhealthy => write!(f, "CardNetworkUnhealthy"),
        }
    }
}

/// Fault classification of a single accelerator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardFaultType {
    #[default]
    Healthy,
    Unhealthy,
    NetworkUnhealthy,
}

/// One accelerator on a fault node. Owned exclusively by its [`FaultNode`] and
/// rebuilt on every sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FaultCard {
    #[serde(rename = "NPUName")]
    pub npu_name: String,
    pub is_fault_card: bool,
    pub fault_type: CardFaultType,
}

/// Cached fault state for one cluster node.
///
/// Created the first session a node appears, updated every session from live
/// health signals, and retained even when the node is temporarily absent from
/// a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FaultNode {
    pub node_name: String,
    /// Full accelerator inventory as reported by the device plugin.
    pub all_cards: Vec<String>,
    pub fault_cards: Vec<FaultCard>,
    #[serde(rename = "UnhealthyNPU")]
    pub unhealthy_npu: Vec<String>,
    #[serde(rename = "NetworkUnhealthyNPU")]
    pub network_unhealthy_npu: Vec<String>,
    pub is_fault_node: bool,
    pub node_health_state: NodeHealthState,
    pub has_card_sub_health_fault: bool,
    pub has_switch_sub_health_fault: bool,
    /// Heartbeat counter as last reported by the node agent.
    pub heartbeat: i64,
    /// Session time at which the heartbeat counter last advanced.
    pub heartbeat_updated_at: i64,
    /// Session time of the last sighting. Internal; not persisted externally.
    pub reported_at: i64,
}

impl FaultNode {
    pub fn new(node_name: impl Into<String>, now: i64) -> Self {
        Self {
            node_name: node_name.into(),
            heartbeat_updated_at: now,
            reported_at: now,
            ..Default::default()
        }
    }

    pub fn is_card_unhealthy(&self, card: &str) -> bool {
        self.unhealthy_npu.iter().any(|c| c == card)
    }

    pub fn is_card_network_unhealthy(&self, card: &str) -> bool {
        self.network_unhealthy_npu.iter().any(|c| c == card)
    }

    pub fn has_sub_health(&self) -> bool {
        self.has_card_sub_health_fault || self.has_switch_sub_health_fault
    }
}

/// External-facing encoding of a [`FaultNode`], omitting internal counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FaultNodeView {
    pub node_name: String,
    pub all_cards: Vec<String>,
    pub fault_cards: Vec<FaultCard>,
    #[serde(rename = "UnhealthyNPU")]
    pub unhealthy_npu: Vec<String>,
    #[serde(rename = "NetworkUnhealthyNPU")]
    pub network_unhealthy_npu: Vec<String>,
    pub is_fault_node: bool,
    pub node_health_state: NodeHealthState,
    pub has_card_sub_health_fault: bool,
    pub has_switch_sub_health_fault: bool,
}

impl From<&FaultNode> for FaultNodeView {
    fn from(node: &FaultNode) -> Self {
        Self {
            node_name: node.node_name.clone(),
            all_cards: node.all_cards.clone(),
            fault_cards: node.fault_cards.clone(),
            unhealthy_npu: node.unhealthy_npu.clone(),
            network_unhealthy_npu: node.network_unhealthy_npu.clone(),
            is_fault_node: node.is_fault_node,
            node_health_state: node.node_health_state,
            has_card_sub_health_fault: node.has_card_sub_health_fault,
            has_switch_sub_health_fault: node.has_switch_sub_health_fault,
        }
    }
}

impl From<FaultNodeView> for FaultNode {
    fn from(view: FaultNodeView) -> Self {
        Self {
            node_name: view.node_name,
            all_cards: view.all_cards,
            fault_cards: view.fault_cards,
            unhealthy_npu: view.unhealthy_npu,
            network_unhealthy_npu: view.network_unhealthy_npu,
            is_fault_node: view.is_fault_node,
            node_health_state: view.node_health_state,
            has_card_sub_health_fault: view.has_card_sub_health_fault,
            has_switch_sub_health_fault: view.has_switch_sub_health_fault,
            ..Default::default()
        }
    }
}
