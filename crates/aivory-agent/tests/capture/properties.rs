//! Property tests for the bounded-tree invariants.
//!
//! Generated value graphs (including cyclic ones) must always produce
//! trees bounded by the configured depth, breadth, and string limits.

use super::*;
use aivory_agent::capture::CapturedValue;
use proptest::prelude::*;

/// Generator for arbitrary runtime value trees.
fn runtime_value() -> impl Strategy<Value = RuntimeValue> {
    let leaf = prop_oneof![
        Just(RuntimeValue::Null),
        any::<bool>().prop_map(RuntimeValue::Bool),
        any::<i64>().prop_map(RuntimeValue::Int),
        any::<f64>().prop_map(RuntimeValue::Float),
        "[a-z]{0,1100}".prop_map(RuntimeValue::string),
    ];
    leaf.prop_recursive(6, 96, 10, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..10)
                .prop_map(|elements| RuntimeValue::array("java.lang.Object[]", elements)),
            prop::collection::vec(inner.clone(), 0..10)
                .prop_map(|elements| RuntimeValue::seq("java.util.ArrayList", elements)),
            prop::collection::hash_map("[a-z]{1,60}", inner.clone(), 0..8).prop_map(|entries| {
                RuntimeValue::map(
                    "java.util.HashMap",
                    entries
                        .into_iter()
                        .map(|(k, v)| (RuntimeValue::string(k), v))
                        .collect(),
                )
            }),
            prop::collection::vec(("[a-z]{1,10}", inner), 0..25)
                .prop_map(|fields| RuntimeValue::object("com.acme.Generated", fields)),
        ]
    })
}

/// Height of a capture tree (a lone leaf has height 0).
fn height(node: &CapturedValue) -> usize {
    node.children
        .values()
        .chain(node.array_elements.iter())
        .map(|child| height(child) + 1)
        .max()
        .unwrap_or(0)
}

/// Recursive per-node limit check.
fn assert_node_bounded(node: &CapturedValue, config: &AgentConfig) {
    assert!(node.array_elements.len() <= config.max_collection_size);
    // Object nodes cap children at 20, map nodes at max_collection_size
    assert!(node.children.len() <= config.max_collection_size.max(20));
    if node.type_name == "string" {
        assert!(node.value.chars().count() <= config.max_string_length);
    }
    // Exactly one child branch is populated
    assert!(node.children.is_empty() || node.array_elements.is_empty());
    for child in node.children.values().chain(node.array_elements.iter()) {
        assert_node_bounded(child, config);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_capture_tree_is_bounded(value in runtime_value()) {
        let config = config();
        let node = ValueSerializer::new(&config).capture("root", &value, 0);
        prop_assert!(height(&node) <= config.max_capture_depth);
        assert_node_bounded(&node, &config);
    }

    #[test]
    fn prop_capture_bounded_under_tight_limits(value in runtime_value()) {
        let mut config = config();
        config.max_capture_depth = 3;
        config.max_collection_size = 5;
        config.max_string_length = 16;
        let node = ValueSerializer::new(&config).capture("root", &value, 0);
        prop_assert!(height(&node) <= 3);
        assert_node_bounded(&node, &config);
    }

    #[test]
    fn prop_untruncated_collections_are_complete(value in runtime_value()) {
        let config = config();
        let node = ValueSerializer::new(&config).capture("root", &value, 0);
        assert_truncation_honest(&node);
    }

    #[test]
    fn prop_cyclic_ring_terminates(ring_len in 1usize..16) {
        let config = config();
        // Ring of objects: node[i].next = node[(i + 1) % n]
        let nodes: Vec<RuntimeValue> = (0..ring_len)
            .map(|_| RuntimeValue::object("com.acme.RingNode", vec![]))
            .collect();
        for (i, node) in nodes.iter().enumerate() {
            let RuntimeValue::Object(object) = node else { unreachable!() };
            object
                .fields
                .borrow_mut()
                .push(("next".to_string(), nodes[(i + 1) % ring_len].clone()));
        }
        let captured = ValueSerializer::new(&config).capture("ring", &nodes[0], 0);
        prop_assert!(height(&captured) <= config.max_capture_depth);
        assert_node_bounded(&captured, &config);
    }
}

/// Truncation honesty: a node that claims no truncation carries everything
/// its declared length promises.
fn assert_truncation_honest(node: &CapturedValue) {
    if !node.is_truncated && !node.array_elements.is_empty() {
        assert_eq!(node.array_elements.len(), node.array_length);
    }
    if !node.is_truncated && node.array_length > 0 && node.array_elements.is_empty() {
        // Maps report their entry count through array_length
        assert_eq!(node.children.len(), node.array_length);
    }
    for child in node.children.values().chain(node.array_elements.iter()) {
        assert_truncation_honest(child);
    }
}

#[test]
fn test_self_referential_object_terminates() {
    let config = config();
    let node = RuntimeValue::object("com.acme.Selfie", vec![]);
    let RuntimeValue::Object(object) = &node else {
        unreachable!()
    };
    object
        .fields
        .borrow_mut()
        .push(("me".to_string(), node.clone()));
    let captured = ValueSerializer::new(&config).capture("selfie", &node, 0);
    assert!(height(&captured) <= config.max_capture_depth);
}

#[test]
fn test_mutual_cycle_through_collection() {
    let config = config();
    let list = RuntimeValue::seq("java.util.ArrayList", vec![]);
    let owner = RuntimeValue::object("com.acme.Owner", vec![("items".to_string(), list.clone())]);
    let RuntimeValue::Seq(seq) = &list else {
        unreachable!()
    };
    seq.elements.borrow_mut().push(owner.clone());
    let captured = ValueSerializer::new(&config).capture("owner", &owner, 0);
    assert!(height(&captured) <= config.max_capture_depth);
    assert_node_bounded(&captured, &config);
}
