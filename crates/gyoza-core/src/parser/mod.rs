use crate::error::CompileError;
use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

/// Parse SQL text with the generic dialect.
///
/// The JOB workload is plain ANSI SELECTs, so no dialect plumbing is needed;
/// the parser is treated as a black box returning a typed AST.
pub fn parse_sql(sql: &str) -> Result<Vec<Statement>, CompileError> {
    Parser::parse_sql(&GenericDialect {}, sql).map_err(Into::into)
}
