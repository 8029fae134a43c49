//! CLI argument parsing using clap.

use clap::Parser;
use std::path::PathBuf;

/// gyoza - compile JOB join queries into semi-join evaluation programs
#[derive(Parser, Debug)]
#[command(name = "gyoza")]
#[command(about = "Compile acyclic join queries into standalone Rust programs", long_about = None)]
#[command(version)]
pub struct Args {
    /// Directory containing the .sql query files
    #[arg(value_name = "QUERIES_DIR")]
    pub queries: PathBuf,

    /// Directory containing the per-query statistics JSON files
    #[arg(long, value_name = "DIR")]
    pub stats_dir: PathBuf,

    /// Schema DDL file (CREATE TABLE statements) for the PK/FK catalog
    #[arg(short, long, value_name = "FILE")]
    pub schema: PathBuf,

    /// Expected-results JSON catalog for embedded self-checks
    #[arg(long, value_name = "FILE")]
    pub expected: Option<PathBuf>,

    /// Directory for the emitted sources and persisted IR JSON
    #[arg(short, long, default_value = "out", value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Compile only the named queries (e.g. 1a, 20b); repeatable
    #[arg(long = "query", value_name = "NAME")]
    pub only: Vec<String>,

    /// Suppress per-query progress lines
    #[arg(short, long)]
    pub quiet: bool,
}
