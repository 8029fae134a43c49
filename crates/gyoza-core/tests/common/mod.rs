//! Shared fixtures for the integration suites: a trimmed JOB-style schema
//! and statistics helpers.

use gyoza_core::{Catalog, Statistics};

pub const JOB_DDL: &str = r#"
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

CREATE TABLE keyword (
    id integer NOT NULL PRIMARY KEY,
    keyword text NOT NULL
);

CREATE TABLE movie_keyword (
    id integer NOT NULL PRIMARY KEY,
    movie_id integer NOT NULL REFERENCES title (id),
    keyword_id integer NOT NULL REFERENCES keyword (id)
);

CREATE TABLE name (
    id integer NOT NULL PRIMARY KEY,
    name text NOT NULL,
    gender character varying(1)
);

CREATE TABLE char_name (
    id integer NOT NULL PRIMARY KEY,
    name text NOT NULL
);

CREATE TABLE cast_info (
    id integer NOT NULL PRIMARY KEY,
    person_id integer NOT NULL REFERENCES name (id),
    movie_id integer NOT NULL REFERENCES title (id),
    person_role_id integer REFERENCES char_name (id),
    note text,
    role_id integer NOT NULL
);

CREATE TABLE company_name (
    id integer NOT NULL PRIMARY KEY,
    name text NOT NULL,
    country_code character varying(255)
);

CREATE TABLE movie_companies (
    id integer NOT NULL PRIMARY KEY,
    movie_id integer NOT NULL REFERENCES title (id),
    company_id integer NOT NULL REFERENCES company_name (id),
    company_type_id integer NOT NULL,
    note text
);

CREATE TABLE info_type (
    id integer NOT NULL PRIMARY KEY,
    info character varying(32) NOT NULL
);

CREATE TABLE movie_info (
    id integer NOT NULL PRIMARY KEY,
    movie_id integer NOT NULL REFERENCES title (id),
    info_type_id integer NOT NULL REFERENCES info_type (id),
    info text NOT NULL,
    note text
);
"#;

pub fn job_catalog() -> Catalog {
    Catalog::from_ddl(JOB_DDL).expect("fixture DDL must parse")
}

pub fn job_stats(entries: &[(&str, u64)]) -> Statistics {
    Statistics::from_sizes(
        entries
            .iter()
            .map(|(key, size)| (key.to_string(), *size))
            .collect(),
    )
}
