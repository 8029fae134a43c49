#![no_main]

use std::collections::BTreeMap;
use std::sync::OnceLock;

use gyoza_core::{compile_query, Catalog, Statistics};
use libfuzzer_sys::fuzz_target;

const DDL: &str = r#"
CREATE TABLE kind_type (
    id integer NOT NULL PRIMARY KEY,
    kind character varying(15) NOT NULL
);
CREATE TABLE title (
    id integer NOT NULL PRIMARY KEY,
    title text NOT NULL,
    kind_id integer NOT NULL REFERENCES kind_type (id),
    production_year integer
);
CREATE TABLE movie_keyword (
    id integer NOT NULL PRIMARY KEY,
    movie_id integer NOT NULL REFERENCES title (id),
    keyword_id integer NOT NULL
);
"#;

fn catalog() -> &'static Catalog {
    static CATALOG: OnceLock<Catalog> = OnceLock::new();
    CATALOG.get_or_init(|| Catalog::from_ddl(DDL).expect("fixture DDL parses"))
}

fn stats() -> &'static Statistics {
    static STATS: OnceLock<Statistics> = OnceLock::new();
    STATS.get_or_init(|| {
        let sizes: BTreeMap<String, u64> = [
            ("q1a_kind_type".to_string(), 1),
            ("q1a_title".to_string(), 100),
            ("q1a_movie_keyword".to_string(), 50),
        ]
        .into_iter()
        .collect();
        Statistics::from_sizes(sizes)
    })
}

// Arbitrary SQL must either compile or fail with a CompileError; it must
// never panic the pipeline.
fuzz_target!(|data: &[u8]| {
    if let Ok(sql) = std::str::from_utf8(data) {
        let _ = compile_query("1a", sql, stats(), catalog(), None);
    }
});
