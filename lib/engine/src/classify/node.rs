// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Node fault classification.
//!
//! Derives a node's and its accelerators' health from the raw signal
//! annotations. First unhealthy signal wins for the node-level verdict:
//! nodeD, then the fabric switch, then per-card classification. Sub-health is
//! recorded independently and never overrides the verdict. A missing or
//! malformed annotation degrades to "no information": classification is
//! total and never errors, so a degraded health-reporting path cannot cause a
//! spurious mass eviction.

use tracing::warn;

use crate::cluster::{
    NodeRecord, CARDS_ANNOTATION, CARD_SUB_HEALTH_ANNOTATION, HEARTBEAT_ANNOTATION,
    NETWORK_UNHEALTHY_CARDS_ANNOTATION, NODE_HEALTH_ANNOTATION, SWITCH_HEALTH_ANNOTATION,
    SWITCH_SUB_HEALTH_ANNOTATION, UNHEALTHY_CARDS_ANNOTATION, UNHEALTHY_VALUE,
};
use crate::config::EngineConfig;
use crate::model::{CardFaultType, FaultCard, FaultNode, NodeHealthState};

/// Classify one live node, carrying forward heartbeat continuity from the
/// prior cached entry if any.
pub fn classify_node(
    record: &NodeRecord,
    prior: Option<&FaultNode>,
    config: &EngineConfig,
    now: i64,
) -> FaultNode {
    let mut all_cards = record.card_list(CARDS_ANNOTATION);
    if all_cards.is_empty() {
        // Inventory annotation missing this session; keep what we knew.
        if let Some(prior) = prior {
            all_cards = prior.all_cards.clone();
        }
    }
    let unhealthy_npu = record.card_list(UNHEALTHY_CARDS_ANNOTATION);
    let network_unhealthy_npu = record.card_list(NETWORK_UNHEALTHY_CARDS_ANNOTATION);

    let node_health_state = node_verdict(record, config, &unhealthy_npu, &network_unhealthy_npu);

    let fault_cards = all_cards
        .iter()
        .map(|card| {
            let fault_type = if unhealthy_npu.iter().any(|c| c == card) {
                CardFaultType::Unhealthy
            } else if network_unhealthy_npu.iter().any(|c| c == card) {
                CardFaultType::NetworkUnhealthy
            } else {
                CardFaultType::Healthy
            };
            FaultCard {
                npu_name: card.clone(),
                is_fault_card: fault_type != CardFaultType::Healthy,
                fault_type,
            }
        })
        .collect();

    let (heartbeat, heartbeat_updated_at) = heartbeat_fields(record, prior, now);

    FaultNode {
        node_name: record.name.clone(),
        all_cards,
        fault_cards,
        unhealthy_npu,
        network_unhealthy_npu,
        is_fault_node: node_health_state != NodeHealthState::Healthy,
        node_health_state,
        has_card_sub_health_fault: flag_annotation(record, CARD_SUB_HEALTH_ANNOTATION),
        has_switch_sub_health_fault: flag_annotation(record, SWITCH_SUB_HEALTH_ANNOTATION),
        heartbeat,
        heartbeat_updated_at,
        reported_at: now,
    }
}

/// Ordered node-level verdict; first unhealthy signal wins.
fn node_verdict(
    record: &NodeRecord,
    config: &EngineConfig,
    unhealthy_npu: &[String],
    network_unhealthy_npu: &[String],
) -> NodeHealthState {
    if config.node_d_enabled && record.annotation(NODE_HEALTH_ANNOTATION) == Some(UNHEALTHY_VALUE) {
        return NodeHealthState::Unhealthy;
    }
    if record.annotation(SWITCH_HEALTH_ANNOTATION) == Some(UNHEALTHY_VALUE) {
        return NodeHealthState::Unhealthy;
    }
    if !unhealthy_npu.is_empty() {
        return NodeHealthState::CardUnhealthy;
    }
    if !network_unhealthy_npu.is_empty() {
        return NodeHealthState::CardNetworkUnhealthy;
    }
    NodeHealthState::Healthy
}

fn flag_annotation(record: &NodeRecord, key: &str) -> bool {
    record.annotation(key) == Some("true")
}

/// Heartbeat continuity: the updated-at timestamp only advances when the
/// agent-reported counter does.
fn heartbeat_fields(record: &NodeRecord, prior: Option<&FaultNode>, now: i64) -> (i64, i64) {
    let reported = match record.annotation(HEARTBEAT_ANNOTATION) {
        Some(raw) => match raw.parse::<i64>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(node = %record.name, value = %raw, "malformed heartbeat annotation");
                None
            }
        },
        None => None,
    };
    match (reported, prior) {
        (Some(hb), Some(prior)) if hb == prior.heartbeat => (hb, prior.heartbeat_updated_at),
        (Some(hb), _) => (hb, now),
        (None, Some(prior)) => (prior.heartbeat, prior.heartbeat_updated_at),
        (None, None) => (0, now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn node_with(annotations: &[(&str, &str)]) -> NodeRecord {
        let mut record = NodeRecord {
            name: "node-0".to_string(),
            ..Default::default()
        };
        for (k, v) in annotations {
            record.annotations.insert(k.to_string(), v.to_string());
        }
        record
    }

    #[test]
    fn test_single_unhealthy_card_marks_card_unhealthy() {
        // nodeD disabled, switch healthy, one card hard-unhealthy.
        let record = node_with(&[
            (CARDS_ANNOTATION, "Ascend910-0,Ascend910-1,Ascend910-2"),
            (UNHEALTHY_CARDS_ANNOTATION, "Ascend910-0"),
        ]);
        let node = classify_node(&record, None, &EngineConfig::default(), 100);

        assert_eq!(node.node_health_state, NodeHealthState::CardUnhealthy);
        assert!(node.is_fault_node);
        assert_eq!(node.fault_cards.len(), 3);
        assert!(node.fault_cards[0].is_fault_card);
        assert_eq!(node.fault_cards[0].fault_type, CardFaultType::Unhealthy);
        assert!(!node.fault_cards[1].is_fault_card);
    }

    #[rstest]
    #[case(&[], NodeHealthState::Healthy)]
    #[case(&[(SWITCH_HEALTH_ANNOTATION, "Unhealthy")], NodeHealthState::Unhealthy)]
    #[case(&[(NETWORK_UNHEALTHY_CARDS_ANNOTATION, "Ascend910-3")], NodeHealthState::CardNetworkUnhealthy)]
    #[case(
        &[(UNHEALTHY_CARDS_ANNOTATION, "Ascend910-1"), (NETWORK_UNHEALTHY_CARDS_ANNOTATION, "Ascend910-2")],
        NodeHealthState::CardUnhealthy
    )]
    fn test_verdict_ordering(
        #[case] annotations: &[(&str, &str)],
        #[case] expected: NodeHealthState,
    ) {
        let record = node_with(annotations);
        let node = classify_node(&record, None, &EngineConfig::default(), 0);
        assert_eq!(node.node_health_state, expected);
        assert_eq!(node.is_fault_node, expected != NodeHealthState::Healthy);
    }

    #[test]
    fn test_node_d_verdict_requires_enablement() {
        let record = node_with(&[(NODE_HEALTH_ANNOTATION, "Unhealthy")]);

        let disabled = classify_node(&record, None, &EngineConfig::default(), 0);
        assert_eq!(disabled.node_health_state, NodeHealthState::Healthy);

        let config = EngineConfig {
            node_d_enabled: true,
            ..Default::default()
        };
        let enabled = classify_node(&record, None, &config, 0);
        assert_eq!(enabled.node_health_state, NodeHealthState::Unhealthy);
    }

    #[test]
    fn test_sub_health_does_not_override_verdict() {
        let record = node_with(&[
            (CARD_SUB_HEALTH_ANNOTATION, "true"),
            (SWITCH_SUB_HEALTH_ANNOTATION, "true"),
        ]);
        let node = classify_node(&record, None, &EngineConfig::default(), 0);

        assert_eq!(node.node_health_state, NodeHealthState::Healthy);
        assert!(!node.is_fault_node);
        assert!(node.has_card_sub_health_fault);
        assert!(node.has_switch_sub_health_fault);
    }

    #[test]
    fn test_heartbeat_updated_only_on_advance() {
        let record = node_with(&[(HEARTBEAT_ANNOTATION, "5")]);
        let first = classify_node(&record, None, &EngineConfig::default(), 100);
        assert_eq!(first.heartbeat, 5);
        assert_eq!(first.heartbeat_updated_at, 100);

        // Same counter next session: updated-at stays put.
        let second = classify_node(&record, Some(&first), &EngineConfig::default(), 200);
        assert_eq!(second.heartbeat_updated_at, 100);

        // Counter advanced: updated-at follows.
        let record = node_with(&[(HEARTBEAT_ANNOTATION, "6")]);
        let third = classify_node(&record, Some(&second), &EngineConfig::default(), 300);
        assert_eq!(third.heartbeat, 6);
        assert_eq!(third.heartbeat_updated_at, 300);
    }

    #[test]
    fn test_missing_inventory_keeps_prior_cards() {
        let record = node_with(&[(CARDS_ANNOTATION, "Ascend910-0,Ascend910-1")]);
        let first = classify_node(&record, None, &EngineConfig::default(), 0);

        let bare = node_with(&[]);
        let second = classify_node(&bare, Some(&first), &EngineConfig::default(), 10);
        assert_eq!(second.all_cards, vec!["Ascend910-0", "Ascend910-1"]);
    }
}
