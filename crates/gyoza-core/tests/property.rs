//! Property tests for the planner invariants and the supporting
//! structures: coverage, tree shape, joinability, determinism, union-find
//! idempotence, and filter-tree round-tripping.

use std::collections::HashSet;

use gyoza_core::{compile_query, CompileError, FilterNode, UnionFind};
use proptest::prelude::*;

mod common;
use common::{job_catalog, job_stats};

/// Dimension tables that all join `title` through the movie id class.
const DIMENSIONS: [&str; 4] = ["movie_keyword", "movie_companies", "cast_info", "movie_info"];

fn star_query(mask: [bool; 4]) -> (String, Vec<(String, u64)>) {
    let mut from = vec!["title t".to_string()];
    let mut joins = Vec::new();
    let mut stats = vec![("q1a_title".to_string(), 1000)];
    for (i, table) in DIMENSIONS.iter().enumerate() {
        if !mask[i] {
            continue;
        }
        let alias = format!("d{i}");
        from.push(format!("{table} {alias}"));
        joins.push(format!("t.id = {alias}.movie_id"));
        stats.push((format!("q1a_{table}"), 10 * (i as u64 + 2)));
    }
    let sql = format!(
        "SELECT MIN(t.title) FROM {} WHERE {}",
        from.join(", "),
        joins.join(" AND ")
    );
    (sql, stats)
}

proptest! {
    /// Random star queries always plan into a rooted tree that covers
    /// every alias, with a realizable join behind every edge, and the
    /// emitter accepts the resulting plan.
    #[test]
    fn star_queries_plan_into_rooted_trees(mask in proptest::array::uniform4(any::<bool>())) {
        prop_assume!(mask.iter().any(|&m| m));

        let (sql, stats) = star_query(mask);
        let stats_refs: Vec<(&str, u64)> =
            stats.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        let compiled = compile_query("1a", &sql, &job_stats(&stats_refs), &job_catalog(), None)
            .expect("star query compiles");

        let total = 1 + mask.iter().filter(|&&m| m).count();
        let plan = &compiled.plan;

        // Coverage: every alias appears exactly once, as an ear or the root.
        let mut covered = plan.program.aliases();
        covered.insert(plan.root.alias.clone());
        prop_assert_eq!(covered.len(), total);
        let ears: Vec<_> = plan.program.ears();
        let unique_ears: HashSet<&str> = ears.iter().map(|e| e.alias.as_str()).collect();
        prop_assert_eq!(ears.len(), unique_ears.len());

        // Tree shape: the root is the one parent that never appears as an ear.
        prop_assert!(!unique_ears.contains(plan.root.alias.as_str()));
        prop_assert_eq!(plan.program.root().map(|r| r.alias.clone()), Some(plan.root.alias.clone()));

        // Joinability: every (ear, parent) pair has a physical column pair.
        for ear in &ears {
            let parent = plan.program.parent_of(&ear.alias).expect("ear has a parent");
            prop_assert!(
                !plan.columns_between(&parent.alias, &ear.alias).is_empty(),
                "no join columns between {} and {}", parent.alias, ear.alias
            );
        }
    }

    /// Compiling the same query twice yields byte-identical IR JSON and
    /// byte-identical source.
    #[test]
    fn compilation_is_deterministic(mask in proptest::array::uniform4(any::<bool>())) {
        prop_assume!(mask.iter().any(|&m| m));

        let (sql, stats) = star_query(mask);
        let stats_refs: Vec<(&str, u64)> =
            stats.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        let run = || {
            compile_query("1a", &sql, &job_stats(&stats_refs), &job_catalog(), None)
                .expect("star query compiles")
        };
        let first = run();
        let second = run();
        prop_assert_eq!(first.ir.to_json().unwrap(), second.ir.to_json().unwrap());
        prop_assert_eq!(first.source, second.source);
    }

    /// find is idempotent and path compression never changes membership.
    #[test]
    fn union_find_is_idempotent(ops in proptest::collection::vec((0u32..40, 0u32..40), 1..120)) {
        let mut uf: UnionFind<u32> = UnionFind::new();
        for (a, b) in &ops {
            uf.union(a, b);
        }
        for x in 0u32..40 {
            let root = uf.find(&x);
            prop_assert_eq!(uf.find(&x), root.clone());
            prop_assert_eq!(uf.find(&root), root.clone());
        }
        for (a, b) in &ops {
            prop_assert!(uf.connected(a, b));
        }
        // Set sizes add up to the universe that was touched.
        let touched: usize = uf.all_elements().len();
        let total: usize = {
            let reps = uf.representatives();
            reps.iter().map(|r| uf.set_size(r)).sum()
        };
        prop_assert_eq!(total, touched);
    }

    /// A filter tree survives the round trip through its persisted JSON
    /// form with operators and operands intact.
    #[test]
    fn filter_trees_round_trip(tree in filter_tree_strategy()) {
        let text = serde_json::to_string(&tree).unwrap();
        let back: FilterNode = serde_json::from_str(&text).unwrap();
        prop_assert_eq!(back, tree);
    }
}

fn filter_tree_strategy() -> impl Strategy<Value = FilterNode> {
    let leaf = prop_oneof![
        "[a-z]{1,6}\\.[a-z_]{1,8}".prop_map(FilterNode::leaf),
        (0i64..100_000).prop_map(|n| FilterNode::leaf(n.to_string())),
        "[a-z ]{0,12}".prop_map(|s| FilterNode::leaf(format!("'{s}'"))),
    ];
    leaf.prop_recursive(4, 24, 4, |inner| {
        prop_oneof![
            (
                prop_oneof![
                    Just("AND"),
                    Just("OR"),
                    Just("EQ"),
                    Just("NEQ"),
                    Just("GT"),
                    Just("LIKE"),
                    Just("NOT LIKE"),
                ],
                inner.clone(),
                inner.clone()
            )
                .prop_map(|(op, l, r)| FilterNode::binary(op, l, r)),
            (inner.clone(), proptest::collection::vec(inner.clone(), 1..4))
                .prop_map(|(l, items)| FilterNode::in_list(l, items, false)),
            inner.prop_map(|l| FilterNode::unary("IS NOT NULL", l)),
        ]
    })
}

/// A query whose selected column sits on an ear that cannot
/// be reached from the root fails with the precise shape error instead of
/// emitting wrong code.
#[test]
fn unreachable_selected_column_is_rejected() {
    let err = compile_query(
        "9z",
        "SELECT MIN(k.keyword) FROM title t, movie_keyword mk, keyword k \
         WHERE t.id = mk.movie_id AND mk.keyword_id = k.id \
           AND t.production_year = 2000",
        &job_stats(&[
            ("q9z_title", 1000),
            ("q9z_movie_keyword", 500),
            ("q9z_keyword", 20),
        ]),
        &job_catalog(),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedShape { .. }));
}
