//! Batch driver: walk a directory of queries, compile each one, persist the
//! IR JSON and the emitted source, and keep a success/failure tally.
//!
//! A failing query is reported and skipped; the batch always runs to the
//! end.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use tracing::info;

use gyoza_core::{compile_query, parse_expected, Catalog, ExpectedResults, Statistics};

use crate::cli::Args;
use crate::discover::find_stats_file;

#[derive(Debug, Default, Clone, Copy)]
pub struct BatchOutcome {
    pub compiled: usize,
    pub failed: usize,
}

impl BatchOutcome {
    pub fn total(&self) -> usize {
        self.compiled + self.failed
    }
}

pub fn run_batch(args: &Args) -> Result<BatchOutcome> {
    let ddl = fs::read_to_string(&args.schema)
        .with_context(|| format!("Failed to read schema file {}", args.schema.display()))?;
    let catalog = Catalog::from_ddl(&ddl).context("Failed to parse schema DDL")?;

    let expected: Option<ExpectedResults> = match &args.expected {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| {
                format!("Failed to read expected-results file {}", path.display())
            })?;
            Some(parse_expected(&text).context("Failed to parse expected-results JSON")?)
        }
        None => None,
    };

    let mut sql_files: Vec<PathBuf> = fs::read_dir(&args.queries)
        .with_context(|| {
            format!("Failed to list queries directory {}", args.queries.display())
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "sql"))
        .collect();
    sql_files.sort();
    if sql_files.is_empty() {
        anyhow::bail!("No .sql files found in {}", args.queries.display());
    }

    fs::create_dir_all(&args.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            args.output_dir.display()
        )
    })?;

    let mut outcome = BatchOutcome::default();
    for sql_file in sql_files {
        let name = sql_file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        if !args.only.is_empty() && !args.only.iter().any(|q| q.eq_ignore_ascii_case(&name)) {
            continue;
        }

        match compile_one(args, &catalog, expected.as_ref(), &sql_file, &name) {
            Ok(()) => {
                outcome.compiled += 1;
                if !args.quiet {
                    println!("{} {name}", "ok".green());
                }
            }
            Err(err) => {
                outcome.failed += 1;
                eprintln!("{} {name}: {err:#}", "failed".red());
            }
        }
    }

    if !args.quiet {
        println!(
            "compiled {}/{} queries",
            outcome.compiled,
            outcome.total()
        );
    }
    info!(
        compiled = outcome.compiled,
        failed = outcome.failed,
        "batch finished"
    );
    Ok(outcome)
}

fn compile_one(
    args: &Args,
    catalog: &Catalog,
    expected: Option<&ExpectedResults>,
    sql_file: &PathBuf,
    name: &str,
) -> Result<()> {
    let sql = fs::read_to_string(sql_file)
        .with_context(|| format!("Failed to read query file {}", sql_file.display()))?;

    let stats_file = find_stats_file(&args.stats_dir, name)?
        .with_context(|| format!("No stats file found for query '{name}'"))?;
    let stats_text = fs::read_to_string(&stats_file)
        .with_context(|| format!("Failed to read stats file {}", stats_file.display()))?;
    let stats = Statistics::from_json_str(&stats_text)
        .with_context(|| format!("Failed to parse stats file {}", stats_file.display()))?;

    let compiled = compile_query(name, &sql, &stats, catalog, expected)?;

    let ir_path = args.output_dir.join(format!("{name}.json"));
    fs::write(&ir_path, compiled.ir.to_json()?)
        .with_context(|| format!("Failed to write {}", ir_path.display()))?;

    let source_path = args.output_dir.join(format!("o{name}.rs"));
    fs::write(&source_path, &compiled.source)
        .with_context(|| format!("Failed to write {}", source_path.display()))?;

    Ok(())
}
