//! Subquery evaluation (§4.D.5): `expr[range:resolution]` runs `expr` as a
//! fresh instant query at each step across `[start, end]` and collects the
//! per-step results into a Matrix keyed by labels.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::model::{LabelSet, Sample, Series, Value};
use crate::promql::ast::{Expr, SelectorModifiers};

use super::Evaluator;

pub fn eval_subquery(
    evaluator: &Evaluator,
    inner: &Expr,
    range_ms: i64,
    resolution_ms: Option<i64>,
    modifiers: &SelectorModifiers,
    outer_at_ms: i64,
) -> Result<Value> {
    let offset = modifiers.offset_ms.unwrap_or(0);
    let at = modifiers.at.map(|a| a.0).unwrap_or(outer_at_ms);
    let end = at - offset;
    let start = end - range_ms;
    let resolution = resolution_ms.unwrap_or_else(|| evaluator.default_subquery_resolution_ms());
    if resolution <= 0 {
        return Err(Error::semantic("subquery resolution must be positive"));
    }

    let mut series_map: HashMap<LabelSet, Vec<Sample>> = HashMap::new();
    let mut t = start;
    while t <= end {
        match evaluator.eval_instant_at(inner, t)? {
            Value::Scalar { value, .. } => {
                series_map.entry(LabelSet::new()).or_default().push(Sample::new(t, value));
            }
            Value::Vector(samples) => {
                for s in samples {
                    series_map.entry(s.labels).or_default().push(Sample::new(t, s.value));
                }
            }
            _ => return Err(Error::semantic("subquery body must evaluate to a scalar or vector")),
        }
        t += resolution;
    }

    Ok(Value::Matrix(series_map.into_iter().map(|(labels, samples)| Series::with_samples(labels, samples)).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::sync::Arc;

    #[test]
    fn subquery_samples_inner_expr_at_each_resolution_step() {
        let storage = Arc::new(MemoryStorage::new());
        for (t, v) in [(0i64, 1.0), (60_000, 2.0), (120_000, 3.0), (180_000, 4.0)] {
            storage.insert(LabelSet::new(), Sample::new(t, v));
        }
        let evaluator = Evaluator::instant(180_000, 300_000, storage);
        let inner = Expr::VectorSelector { name: None, matchers: vec![], modifiers: SelectorModifiers::default() };
        let result = eval_subquery(&evaluator, &inner, 120_000, Some(60_000), &SelectorModifiers::default(), 180_000).unwrap();
        let matrix = result.as_matrix().unwrap();
        assert_eq!(matrix.len(), 1);
        assert!(matrix[0].samples.len() >= 2);
    }
}
