//! End-to-end scenarios: one test per workload shape, from SQL text to
//! emitted source, checking the IR, the plan, and the rendered code.

use gyoza_core::{compile_query, Cell, CompileError, ExpectedResults};
use serde_json::json;

mod common;
use common::{job_catalog, job_stats};

#[test]
fn single_table_min() {
    let compiled = compile_query(
        "1a",
        "SELECT MIN(t.title) FROM title t WHERE t.production_year = 2007;",
        &job_stats(&[("q1a_title", 120)]),
        &job_catalog(),
        None,
    )
    .unwrap();

    // IR: a single alias with the EQ filter and title selected.
    let ir: serde_json::Value =
        serde_json::from_str(&compiled.ir.to_json().unwrap()).unwrap();
    assert_eq!(
        ir["t"]["filters"],
        json!({"operator": "EQ", "left": "t.production_year", "right": "2007"})
    );
    assert_eq!(ir["t"]["min_select"], json!(["title"]));
    assert_eq!(ir["t"]["size_after_filters"], json!(120));

    // Plan: t alone, no ears.
    assert_eq!(compiled.plan.root.alias, "t");
    assert!(compiled.plan.program.is_empty());

    // Emitted code: a single stream minimum over title.
    assert!(compiled.source.contains("pub fn q1a(db: &Db) -> Option<(String,)>"));
    assert!(compiled.source.contains(".min();"));
}

#[test]
fn two_table_pk_join() {
    let compiled = compile_query(
        "2a",
        "SELECT MIN(t.title) FROM title t, kind_type kt \
         WHERE t.kind_id = kt.id AND kt.kind = 'movie';",
        &job_stats(&[("q2a_title", 300), ("q2a_kind_type", 1)]),
        &job_catalog(),
        None,
    )
    .unwrap();

    // kt is an ear under t and, at cardinality 1, becomes a scalar lookup.
    assert_eq!(compiled.plan.root.alias, "t");
    assert_eq!(compiled.plan.program.parent_of("kt").unwrap().alias, "t");
    assert!(compiled.source.contains("let kt_id = "));
    assert!(compiled.source.contains("if !(kind_id == kt_id)"));
}

#[test]
fn fk_fan_in_with_set_reduction() {
    let compiled = compile_query(
        "3a",
        "SELECT MIN(t.title) FROM title t, movie_keyword mk, keyword k \
         WHERE t.id = mk.movie_id AND mk.keyword_id = k.id \
           AND k.keyword = 'character-name-in-title';",
        &job_stats(&[
            ("q3a_title", 2000),
            ("q3a_movie_keyword", 800),
            ("q3a_keyword", 1),
        ]),
        &job_catalog(),
        None,
    )
    .unwrap();

    assert_eq!(compiled.plan.root.alias, "t");
    assert!(compiled.source.contains("let k_id = "));
    assert!(compiled.source.contains("let mk_s: HashSet<i32> = "));
    assert!(compiled.source.contains("if !(mk_s.contains(&id))"));
    assert!(compiled
        .source
        .contains("keyword == \"character-name-in-title\""));
}

#[test]
fn two_aggregates_with_distant_ear_lookup() {
    let compiled = compile_query(
        "4a",
        "SELECT MIN(chn.name), MIN(n.name) \
         FROM cast_info ci, char_name chn, name n \
         WHERE ci.person_role_id = chn.id AND ci.person_id = n.id;",
        &job_stats(&[
            ("q4a_cast_info", 5000),
            ("q4a_char_name", 900),
            ("q4a_name", 700),
        ]),
        &job_catalog(),
        None,
    )
    .unwrap();

    // Root policy: cast_info drives the final loop.
    assert_eq!(compiled.plan.root.alias, "ci");
    assert!(compiled.source.contains("let chn_m: HashMap<i32, &str> = "));
    assert!(compiled.source.contains("let n_m: HashMap<i32, &str> = "));
    assert!(compiled.source.contains("chn_m.get(&person_role_id)"));
    assert!(compiled.source.contains("n_m.get(&person_id)"));
    // Pointwise minimum across both fields.
    assert!(compiled.source.contains("best0.min(chn_name)"));
    assert!(compiled.source.contains("best1.min(n_name)"));
}

#[test]
fn like_with_wildcard_split() {
    let compiled = compile_query(
        "5a",
        "SELECT MIN(t.title) FROM title t, movie_companies mc \
         WHERE t.id = mc.movie_id AND mc.note LIKE '%(200%)%' \
           AND t.title LIKE 'The%';",
        &job_stats(&[("q5a_title", 500), ("q5a_movie_companies", 250)]),
        &job_catalog(),
        None,
    )
    .unwrap();

    // Two deduplicated searchers for the floating fragments; the anchored
    // pattern compiles to starts_with and allocates none.
    assert!(compiled.source.contains("let finder1 = Finder::new(\"(200\");"));
    assert!(compiled.source.contains("let finder2 = Finder::new(\")\");"));
    assert!(!compiled.source.contains("Finder::new(\"The\""));
    assert!(compiled.source.contains("title.starts_with(\"The\")"));

    let finder_pos = compiled.source.find("let finder1").unwrap();
    let clock_pos = compiled.source.find("let started = Instant::now();").unwrap();
    assert!(finder_pos < clock_pos);
}

#[test]
fn unsupported_operator_surfaces_and_names_the_subtree() {
    let err = compile_query(
        "6a",
        "SELECT MIN(t.title) FROM title t WHERE t.id % 2 = 1;",
        &job_stats(&[("q6a_title", 10)]),
        &job_catalog(),
        None,
    )
    .unwrap_err();
    match err {
        CompileError::UnsupportedFilter { operator, subtree } => {
            assert_eq!(operator, "MODULO");
            assert!(subtree.contains("t.id"));
        }
        other => panic!("expected UnsupportedFilter, got {other:?}"),
    }
}

#[test]
fn between_compiles_as_two_comparisons() {
    let compiled = compile_query(
        "7a",
        "SELECT MIN(t.title) FROM title t \
         WHERE t.production_year BETWEEN 2005 AND 2010;",
        &job_stats(&[("q7a_title", 60)]),
        &job_catalog(),
        None,
    )
    .unwrap();
    assert!(compiled.source.contains(">= 2005"));
    assert!(compiled.source.contains("<= 2010"));
}

#[test]
fn self_check_is_embedded_from_the_expected_catalog() {
    let mut expected = ExpectedResults::new();
    expected.insert(
        "8a".to_string(),
        Some(vec![Cell::Text("Dune".to_string())]),
    );
    let compiled = compile_query(
        "8a",
        "SELECT MIN(t.title) FROM title t WHERE t.production_year = 1984;",
        &job_stats(&[("q8a_title", 40)]),
        &job_catalog(),
        Some(&expected),
    )
    .unwrap();
    assert!(compiled.source.contains("fn test_q8a()"));
    assert!(compiled
        .source
        .contains("assert_eq!(q8a(&db), Some((\"Dune\".to_string(),)));"));
}

#[test]
fn batch_continues_past_a_failing_query() {
    // Mirrors the driver behavior: each query compiles independently, so
    // one failure cannot poison the next compilation.
    let catalog = job_catalog();
    let bad = compile_query(
        "9a",
        "SELECT MIN(t.title) FROM title t WHERE t.id % 2 = 1;",
        &job_stats(&[("q9a_title", 10)]),
        &catalog,
        None,
    );
    assert!(bad.is_err());

    let good = compile_query(
        "9b",
        "SELECT MIN(t.title) FROM title t WHERE t.production_year = 2000;",
        &job_stats(&[("q9b_title", 10)]),
        &catalog,
        None,
    );
    assert!(good.is_ok());
}
