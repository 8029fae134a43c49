//! gyoza CLI - batch compiler driver for JOB-style join queries.

pub mod cli;
pub mod discover;
pub mod driver;

pub use cli::Args;
pub use driver::{run_batch, BatchOutcome};
