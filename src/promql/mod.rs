pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod token;

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::model::Value;
use crate::storage::Storage;

pub use eval::Evaluator;
pub use parser::{ParseError, ParseResult, Parser};

/// Parses `query` and runs it as an instant query at `at_ms`, per §4.D.1.
/// `lookback_ms` bounds how stale a sample may be and still satisfy a vector
/// selector (the PromQL staleness window, default 5m at the API layer).
pub fn evaluate_instant_query(query: &str, at_ms: i64, lookback_ms: i64, storage: Arc<dyn Storage>) -> Result<Value> {
    let expr = parse_query(query)?;
    Evaluator::instant(at_ms, lookback_ms, storage).evaluate(&expr)
}

/// Parses `query` and runs it as a range query over `[start_ms, end_ms]` at
/// `step_ms` resolution, per §4.D.2.
pub fn evaluate_range_query(query: &str, start_ms: i64, end_ms: i64, step_ms: i64, lookback_ms: i64, storage: Arc<dyn Storage>) -> Result<Value> {
    let expr = parse_query(query)?;
    Evaluator::range(start_ms, end_ms, step_ms, lookback_ms, storage)?.evaluate(&expr)
}

fn parse_query(query: &str) -> Result<ast::Expr> {
    let result = Parser::parse(query);
    match result.expr {
        Some(expr) if result.errors.is_empty() => Ok(expr),
        _ => {
            let first = result.errors.into_iter().next();
            match first {
                Some(e) => Err(Error::syntax(e.pos, e.message)),
                None => Err(Error::syntax(crate::error::Position { line: 1, col: 1 }, "empty query")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LabelSet, Sample};
    use crate::storage::MemoryStorage;

    #[test]
    fn instant_query_end_to_end_through_the_parser() {
        let storage = Arc::new(MemoryStorage::new());
        let mut labels = LabelSet::new();
        labels.insert("__name__", "up");
        labels.insert("job", "api");
        storage.insert(labels, Sample::new(0, 1.0));

        let result = evaluate_instant_query(r#"up{job="api"}"#, 0, 300_000, storage).unwrap();
        let v = result.as_vector().unwrap();
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].value, 1.0);
    }

    #[test]
    fn syntax_error_surfaces_as_error() {
        let storage = Arc::new(MemoryStorage::new());
        assert!(evaluate_instant_query("sum(", 0, 300_000, storage).is_err());
    }
}
