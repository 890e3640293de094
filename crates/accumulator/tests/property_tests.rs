//! Property-based tests using proptest

use proptest::prelude::*;
use std::collections::HashSet;

use confweave_accumulator::*;
use confweave_config::EngineSettings;
use confweave_core::{Component, ComponentKind, PropertyValue};

const SUB_SEQUENCES: [&str; 2] = ["SeqA", "SeqB"];

fn unit() -> Accumulator {
    Accumulator::with_settings(&EngineSettings {
        leak_check: false,
        ..EngineSettings::default()
    })
}

/// Each algorithm name always lives in the same place: the main sequence or
/// one of the sub-sequences.
fn home(index: usize) -> Option<&'static str> {
    match index % 3 {
        0 => None,
        n => Some(SUB_SEQUENCES[n - 1]),
    }
}

fn build(indices: &[usize]) -> Accumulator {
    let mut acc = unit();
    for seq in SUB_SEQUENCES {
        if indices.iter().any(|i| home(*i) == Some(seq)) {
            acc.add_sub_sequence(SequenceNode::new(seq), None).unwrap();
        }
    }
    for i in indices {
        let name = format!("alg{i}");
        let alg = Component::event_algorithm("Worker", name).with("Index", *i as i64);
        acc.add_event_algorithm(alg, home(*i), false).unwrap();
    }
    acc
}

fn registry(acc: &Accumulator) -> Vec<(String, Option<PropertyValue>)> {
    let mut out: Vec<_> = acc
        .components(ComponentKind::EventAlgorithm)
        .into_iter()
        .map(|c| (c.instance_name.clone(), c.get("Index").cloned()))
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

/// Assert no algorithm repeats along any root-to-leaf path.
fn assert_paths_unique(acc: &Accumulator, node: &SequenceNode, path: &mut Vec<String>) {
    let mut added = 0;
    for id in node.algorithms() {
        let name = acc.resolve(id).unwrap().instance_name.clone();
        assert!(!path.contains(&name), "{name} repeated along {path:?}");
        path.push(name);
        added += 1;
    }
    for sub in node.sub_sequences() {
        assert_paths_unique(acc, sub, path);
    }
    path.truncate(path.len() - added);
}

fn algorithm_lists() -> impl Strategy<Value = Vec<usize>> {
    proptest::collection::vec(0usize..9, 0..6)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_merge_is_structurally_associative(
        a in algorithm_lists(),
        b in algorithm_lists(),
        c in algorithm_lists(),
    ) {
        // (A + B) + C
        let mut left = unit();
        left.merge(&mut build(&a)).unwrap();
        left.merge(&mut build(&b)).unwrap();
        left.merge(&mut build(&c)).unwrap();

        // A + (B + C)
        let mut bc = unit();
        bc.merge(&mut build(&b)).unwrap();
        bc.merge(&mut build(&c)).unwrap();
        let mut right = unit();
        right.merge(&mut build(&a)).unwrap();
        right.merge(&mut bc).unwrap();

        prop_assert_eq!(left.flattened_sequences(), right.flattened_sequences());
        prop_assert_eq!(registry(&left), registry(&right));
    }

    #[test]
    fn test_leaf_uniqueness_holds_after_any_operations(
        ops in proptest::collection::vec((0usize..4, 0usize..4, any::<bool>()), 1..20)
    ) {
        let sequences = ["AthAlgSeq", "Outer", "Inner", "Side"];
        let scaffold = |acc: &mut Accumulator| {
            acc.add_sub_sequence(SequenceNode::new("Outer"), None).unwrap();
            acc.add_sub_sequence(SequenceNode::new("Inner"), Some("Outer")).unwrap();
            acc.add_sub_sequence(SequenceNode::new("Side"), None).unwrap();
        };

        let mut root = unit();
        scaffold(&mut root);

        for (alg, seq, via_merge) in ops {
            let before = root.flattened_sequences();
            let algorithm = Component::event_algorithm("Worker", format!("alg{alg}"));
            let result = if via_merge {
                let mut child = unit();
                scaffold(&mut child);
                child.add_event_algorithm(algorithm, Some(sequences[seq]), false).unwrap();
                root.merge(&mut child)
            } else {
                root.add_event_algorithm(algorithm, Some(sequences[seq]), false)
            };

            if result.is_err() {
                prop_assert_eq!(&before, &root.flattened_sequences());
            }
            let mut path = Vec::new();
            assert_paths_unique(&root, root.main_sequence(), &mut path);
        }
    }

    #[test]
    fn test_repeated_insertion_keeps_one_leaf(times in 1usize..6) {
        let mut acc = unit();
        for _ in 0..times {
            acc.add_event_algorithm(Component::event_algorithm("Worker", "alg"), None, false).unwrap();
        }
        prop_assert_eq!(acc.main_sequence().children().len(), 1);
        prop_assert_eq!(acc.components(ComponentKind::EventAlgorithm).len(), 1);
    }
}

#[test]
fn test_paths_checker_sees_nested_sequences() {
    let acc = build(&[0, 1, 2]);
    let seen: HashSet<String> = acc
        .flattened_sequences()
        .remove("AthAlgSeq")
        .unwrap_or_default()
        .into_iter()
        .collect();
    assert_eq!(seen.len(), 3);
    let mut path = Vec::new();
    assert_paths_unique(&acc, acc.main_sequence(), &mut path);
}
