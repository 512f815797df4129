//! The PromQL evaluator (§4.D): instant and range evaluation over a
//! [`Storage`] backend. Generalizes the teacher's `promql/eval.rs`
//! (`evaluate_instant_query`/`evaluate_range_query` over `promql_parser`'s AST
//! and ClickHouse-backed `TimeSeries`) onto this crate's hand-rolled AST and
//! [`Value`] model.

pub mod aggregate;
pub mod binary;
pub mod compute;
pub mod functions;
pub mod subquery;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::model::{InstantSample, LabelSet, Matcher, Sample, Series, Value};
use crate::storage::{matchers_with_name, AggregateRequest, Storage};

use super::ast::{AggOp, Expr, SelectorModifiers, UnaryOp};

const DEFAULT_SUBQUERY_RESOLUTION_MS: i64 = 60_000;

enum Mode {
    Instant { at_ms: i64 },
    Range { start_ms: i64, end_ms: i64, step_ms: i64 },
}

/// Evaluates a parsed PromQL AST against a [`Storage`] backend. One evaluator
/// serves exactly one query: an instant query, a range query, or (spawned
/// internally) a single subquery step.
pub struct Evaluator {
    storage: Arc<dyn Storage>,
    lookback_ms: i64,
    mode: Mode,
}

impl Evaluator {
    pub fn instant(at_ms: i64, lookback_ms: i64, storage: Arc<dyn Storage>) -> Self {
        Self { storage, lookback_ms, mode: Mode::Instant { at_ms } }
    }

    pub fn range(start_ms: i64, end_ms: i64, step_ms: i64, lookback_ms: i64, storage: Arc<dyn Storage>) -> Result<Self> {
        if step_ms <= 0 {
            return Err(Error::semantic("range query step must be positive"));
        }
        Ok(Self { storage, lookback_ms, mode: Mode::Range { start_ms, end_ms, step_ms } })
    }

    /// The query's evaluation result, per §4.D.1 (instant) or §4.D.2 (range).
    pub fn evaluate(&self, expr: &Expr) -> Result<Value> {
        match self.mode {
            Mode::Instant { at_ms } => self.eval_instant_at(expr, at_ms),
            Mode::Range { .. } => self.eval_range(expr),
        }
    }

    fn default_subquery_resolution_ms(&self) -> i64 {
        match self.mode {
            Mode::Range { step_ms, .. } => step_ms,
            Mode::Instant { .. } => DEFAULT_SUBQUERY_RESOLUTION_MS,
        }
    }

    fn steps(&self) -> Vec<i64> {
        match self.mode {
            Mode::Range { start_ms, end_ms, step_ms } => {
                let mut out = Vec::new();
                let mut t = start_ms;
                while t <= end_ms {
                    out.push(t);
                    t += step_ms;
                }
                out
            }
            Mode::Instant { at_ms } => vec![at_ms],
        }
    }

    // ── §4.D.1 instant evaluation ───────────────────────────────────────

    /// Spawns a fresh instant evaluation at `at_ms` sharing this evaluator's
    /// storage and lookback window — used both by the top-level `evaluate()`
    /// and, recursively, by subqueries.
    pub fn eval_instant_at(&self, expr: &Expr, at_ms: i64) -> Result<Value> {
        match expr {
            Expr::NumberLiteral(n) => Ok(Value::Scalar { timestamp_ms: at_ms, value: *n }),
            Expr::StringLiteral(s) => Ok(Value::String { timestamp_ms: at_ms, value: s.clone() }),
            Expr::Paren(inner) => self.eval_instant_at(inner, at_ms),

            Expr::VectorSelector { name, matchers, modifiers } => {
                self.eval_vector_selector(name.as_deref(), matchers, modifiers, at_ms)
            }
            Expr::MatrixSelector { name, matchers, range_ms, modifiers } => {
                self.eval_matrix_selector(name.as_deref(), matchers, *range_ms, modifiers, at_ms)
            }

            Expr::Unary { op, expr } => {
                let value = self.eval_instant_at(expr, at_ms)?;
                Ok(negate(*op, value))
            }

            Expr::Binary { op, lhs, rhs, modifier } => {
                let lhs_value = self.eval_instant_at(lhs, at_ms)?;
                let rhs_value = self.eval_instant_at(rhs, at_ms)?;
                binary::apply_binary(*op, lhs_value, rhs_value, modifier)
            }

            Expr::Aggregate { op, expr, param, grouping } if *op == AggOp::CountValues => {
                let label_name = Self::count_values_label(param.as_deref())?;
                let vector = self
                    .eval_instant_at(expr, at_ms)?
                    .as_vector()
                    .ok_or_else(|| Error::semantic("aggregation requires a vector operand"))?
                    .to_vec();
                Ok(Value::Vector(aggregate::count_values(vector, &label_name, grouping, at_ms)?))
            }

            Expr::Aggregate { op, expr, param, grouping } => {
                let param_value = param.as_ref().map(|p| self.eval_instant_at(p, at_ms)).transpose()?.and_then(|v| v.as_scalar());

                if let Expr::VectorSelector { name, matchers, modifiers } = expr.as_ref() {
                    if op.pushdown_eligible() {
                        if let Some(pushed) = self.try_pushdown(*op, name.as_deref(), matchers, modifiers, grouping, param_value, at_ms)? {
                            return Ok(Value::Vector(pushed));
                        }
                    }
                }

                let vector = self
                    .eval_instant_at(expr, at_ms)?
                    .as_vector()
                    .ok_or_else(|| Error::semantic("aggregation requires a vector operand"))?
                    .to_vec();
                Ok(Value::Vector(aggregate::aggregate(*op, vector, grouping, param_value, at_ms)?))
            }

            Expr::Call { func, args } => {
                let arg_values = args.iter().map(|a| self.eval_instant_at(a, at_ms)).collect::<Result<Vec<_>>>()?;
                functions::call(func, arg_values, at_ms)
            }

            Expr::Subquery { expr, range_ms, resolution_ms, modifiers } => {
                subquery::eval_subquery(self, expr, *range_ms, *resolution_ms, modifiers, at_ms)
            }
        }
    }

    fn selector_window(&self, modifiers: &SelectorModifiers, at_ms: i64, range_ms: i64) -> (i64, i64) {
        let offset = modifiers.offset_ms.unwrap_or(0);
        let at = modifiers.at.map(|a| a.0).unwrap_or(at_ms);
        (at - offset - range_ms, at - offset)
    }

    fn eval_vector_selector(&self, name: Option<&str>, matchers: &[Matcher], modifiers: &SelectorModifiers, at_ms: i64) -> Result<Value> {
        let (start, end) = self.selector_window(modifiers, at_ms, self.lookback_ms);
        let full_matchers = matchers_with_name(name, matchers);
        let series = self.storage.query(&full_matchers, start, end)?;

        let samples = series
            .into_iter()
            .filter_map(|s| {
                let sample = s.sample_at_or_before(end)?;
                if sample.timestamp_ms < start {
                    return None;
                }
                Some(InstantSample::new(s.labels, sample.timestamp_ms, sample.value))
            })
            .collect();
        Ok(Value::Vector(samples))
    }

    fn eval_matrix_selector(&self, name: Option<&str>, matchers: &[Matcher], range_ms: i64, modifiers: &SelectorModifiers, at_ms: i64) -> Result<Value> {
        let (start, end) = self.selector_window(modifiers, at_ms, range_ms);
        let full_matchers = matchers_with_name(name, matchers);
        let series = self.storage.query(&full_matchers, start, end)?;
        Ok(Value::Matrix(series))
    }

    fn try_pushdown(
        &self,
        op: AggOp,
        name: Option<&str>,
        matchers: &[Matcher],
        modifiers: &SelectorModifiers,
        grouping: &super::ast::Grouping,
        param: Option<f64>,
        at_ms: i64,
    ) -> Result<Option<Vec<InstantSample>>> {
        let (start, end) = self.selector_window(modifiers, at_ms, self.lookback_ms);
        let full_matchers = matchers_with_name(name, matchers);
        let request = AggregateRequest { op, grouping_keys: grouping.labels.clone(), without: grouping.without, param };

        match self.storage.query_aggregate(&full_matchers, start, end, &request) {
            Ok(Some(series)) => Ok(Some(
                series
                    .into_iter()
                    .filter_map(|s| {
                        let sample = s.sample_at_or_before(end)?;
                        Some(InstantSample::new(s.labels, sample.timestamp_ms, sample.value))
                    })
                    .collect(),
            )),
            Ok(None) => Ok(None),
            Err(_) => Ok(None), // fall back to the non-pushdown path on any pushdown error
        }
    }

    // ── §4.D.2 vectorized range evaluation ──────────────────────────────

    fn eval_range(&self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::NumberLiteral(n) => {
                let samples = self.steps().into_iter().map(|t| Sample::new(t, *n)).collect();
                Ok(Value::Matrix(vec![Series::with_samples(LabelSet::new(), samples)]))
            }
            Expr::VectorSelector { name, matchers, modifiers } => self.range_vector_selector(name.as_deref(), matchers, modifiers),
            Expr::Call { func, args } if matches!(func.as_str(), "rate" | "increase" | "irate") => self.range_rate_family(func, args),
            Expr::Aggregate { op, expr, param, grouping } => self.range_aggregate(*op, expr, param.as_deref(), grouping),
            _ => self.range_fallback(expr),
        }
    }

    fn range_vector_selector(&self, name: Option<&str>, matchers: &[Matcher], modifiers: &SelectorModifiers) -> Result<Value> {
        let steps = self.steps();
        let Mode::Range { start_ms, end_ms, .. } = self.mode else { unreachable!() };
        let offset = modifiers.offset_ms.unwrap_or(0);
        let (query_start, query_end) = (start_ms - self.lookback_ms - offset, end_ms - offset);
        let full_matchers = matchers_with_name(name, matchers);
        let raw = self.storage.query(&full_matchers, query_start, query_end)?;

        let out = raw
            .into_iter()
            .map(|series| {
                let samples = steps
                    .iter()
                    .filter_map(|&t| {
                        let target = t - offset;
                        let sample = series.sample_at_or_before(target)?;
                        if sample.timestamp_ms < target - self.lookback_ms {
                            return None;
                        }
                        Some(Sample::new(t, sample.value))
                    })
                    .collect();
                Series::with_samples(series.labels, samples)
            })
            .filter(|s: &Series| !s.samples.is_empty())
            .collect();
        Ok(Value::Matrix(out))
    }

    fn range_rate_family(&self, func: &str, args: &[Expr]) -> Result<Value> {
        let Expr::MatrixSelector { name, matchers, range_ms, modifiers } = &args[0] else {
            return self.range_fallback(&Expr::Call { func: func.to_string(), args: args.to_vec() });
        };
        let steps = self.steps();
        let offset = modifiers.offset_ms.unwrap_or(0);
        let Mode::Range { start_ms, end_ms, .. } = self.mode else { unreachable!() };
        let query_start = start_ms - range_ms - offset;
        let query_end = end_ms - offset;
        let full_matchers = matchers_with_name(name.as_deref(), matchers);
        let raw = self.storage.query(&full_matchers, query_start, query_end)?;

        let compute_fn: fn(&[Sample]) -> Option<f64> = match func {
            "rate" => compute::compute_rate,
            "increase" => compute::compute_increase,
            "irate" => compute::compute_irate,
            _ => unreachable!(),
        };

        let out = raw
            .into_iter()
            .map(|series| {
                let samples = steps
                    .iter()
                    .filter_map(|&t| {
                        let window = series.samples_in_range(t - range_ms - offset, t - offset);
                        let value = compute_fn(window)?;
                        Some(Sample::new(t, value))
                    })
                    .collect();
                Series::with_samples(series.labels.without_metric_name(), samples)
            })
            .filter(|s: &Series| !s.samples.is_empty())
            .collect();
        Ok(Value::Matrix(out))
    }

    fn range_aggregate(&self, op: AggOp, inner: &Expr, param: Option<&Expr>, grouping: &super::ast::Grouping) -> Result<Value> {
        let inner_matrix = self.eval_range(inner)?.as_matrix().ok_or_else(|| Error::semantic("aggregation requires a vector/matrix operand"))?.to_vec();

        let label_name = if op == AggOp::CountValues { Some(Self::count_values_label(param)?) } else { None };
        let param_value = if label_name.is_none() {
            param.map(|p| self.eval_instant_at(p, self.steps()[0])).transpose()?.and_then(|v| v.as_scalar())
        } else {
            None
        };

        let mut by_label: HashMap<LabelSet, Vec<Sample>> = HashMap::new();
        for &t in &self.steps() {
            let slice: Vec<InstantSample> = inner_matrix
                .iter()
                .filter_map(|series| {
                    series.samples.iter().find(|s| s.timestamp_ms == t).map(|s| InstantSample::new(series.labels.clone(), t, s.value))
                })
                .collect();
            if slice.is_empty() {
                continue;
            }
            let reduced = match &label_name {
                Some(label) => aggregate::count_values(slice, label, grouping, t)?,
                None => aggregate::aggregate(op, slice, grouping, param_value, t)?,
            };
            for out in reduced {
                by_label.entry(out.labels).or_default().push(Sample::new(t, out.value));
            }
        }
        Ok(Value::Matrix(by_label.into_iter().map(|(l, s)| Series::with_samples(l, s)).collect()))
    }

    /// Extracts the string parameter `count_values("label", v)` requires — the
    /// parser always stores it as a `StringLiteral` (`parser.rs`'s aggregation
    /// parsing), never a number.
    fn count_values_label(param: Option<&Expr>) -> Result<String> {
        match param {
            Some(Expr::StringLiteral(s)) => Ok(s.clone()),
            _ => Err(Error::semantic("count_values: parameter must be a string")),
        }
    }

    /// Generic per-step fallback (§4.D.2): run the instant evaluator at every
    /// step and merge results into series keyed by labels.
    fn range_fallback(&self, expr: &Expr) -> Result<Value> {
        let mut by_label: HashMap<LabelSet, Vec<Sample>> = HashMap::new();
        for t in self.steps() {
            match self.eval_instant_at(expr, t)? {
                Value::Scalar { value, .. } => by_label.entry(LabelSet::new()).or_default().push(Sample::new(t, value)),
                Value::Vector(samples) => {
                    for s in samples {
                        by_label.entry(s.labels).or_default().push(Sample::new(t, s.value));
                    }
                }
                Value::Matrix(_) | Value::String { .. } => {
                    return Err(Error::semantic("range evaluation requires a scalar- or vector-valued expression"));
                }
            }
        }
        Ok(Value::Matrix(by_label.into_iter().map(|(l, s)| Series::with_samples(l, s)).collect()))
    }
}

fn negate(op: UnaryOp, value: Value) -> Value {
    let sign = match op {
        UnaryOp::Plus => 1.0,
        UnaryOp::Minus => -1.0,
    };
    match value {
        Value::Scalar { timestamp_ms, value } => Value::Scalar { timestamp_ms, value: value * sign },
        Value::Vector(v) => Value::Vector(
            v.into_iter().map(|s| InstantSample { labels: s.labels.without_metric_name(), timestamp_ms: s.timestamp_ms, value: s.value * sign }).collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MatchKind;
    use crate::promql::ast::{BinModifier, BinaryOp};
    use crate::storage::MemoryStorage;

    fn storage_with(points: &[(&str, &str, i64, f64)]) -> Arc<MemoryStorage> {
        let storage = Arc::new(MemoryStorage::new());
        for &(name, job, t, v) in points {
            let mut labels = LabelSet::new();
            labels.insert("__name__", name);
            labels.insert("job", job);
            storage.insert(labels, Sample::new(t, v));
        }
        storage
    }

    #[test]
    fn instant_vector_selector_picks_last_sample_before_at() {
        let storage = storage_with(&[("up", "api", 0, 1.0), ("up", "api", 60_000, 0.0)]);
        let evaluator = Evaluator::instant(90_000, 300_000, storage);
        let matchers = vec![Matcher::new(MatchKind::Equal, "job", "api")];
        let expr = Expr::VectorSelector { name: Some("up".to_string()), matchers, modifiers: SelectorModifiers::default() };
        let result = evaluator.evaluate(&expr).unwrap();
        let v = result.as_vector().unwrap();
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].value, 0.0);
    }

    #[test]
    fn lookback_staleness_drops_samples_older_than_window() {
        let storage = storage_with(&[("up", "api", 0, 1.0)]);
        let evaluator = Evaluator::instant(400_000, 300_000, storage);
        let matchers = vec![Matcher::new(MatchKind::Equal, "job", "api")];
        let expr = Expr::VectorSelector { name: Some("up".to_string()), matchers, modifiers: SelectorModifiers::default() };
        let result = evaluator.evaluate(&expr).unwrap();
        assert!(result.as_vector().unwrap().is_empty());
    }

    #[test]
    fn binary_add_between_two_vector_selectors_matches_on_job() {
        let storage = storage_with(&[("a", "api", 0, 2.0), ("b", "api", 0, 3.0)]);
        let evaluator = Evaluator::instant(0, 300_000, storage);
        let a = Expr::VectorSelector { name: Some("a".to_string()), matchers: vec![], modifiers: SelectorModifiers::default() };
        let b = Expr::VectorSelector { name: Some("b".to_string()), matchers: vec![], modifiers: SelectorModifiers::default() };
        let expr = Expr::Binary { op: BinaryOp::Add, lhs: Box::new(a), rhs: Box::new(b), modifier: BinModifier::default() };
        let result = evaluator.evaluate(&expr).unwrap();
        let v = result.as_vector().unwrap();
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].value, 5.0);
        assert_eq!(v[0].labels.get("__name__"), None);
    }

    #[test]
    fn range_query_produces_one_sample_per_step() {
        let storage = storage_with(&[("up", "api", 0, 1.0), ("up", "api", 30_000, 2.0), ("up", "api", 60_000, 3.0)]);
        let evaluator = Evaluator::range(0, 60_000, 30_000, 300_000, storage).unwrap();
        let matchers = vec![Matcher::new(MatchKind::Equal, "job", "api")];
        let expr = Expr::VectorSelector { name: Some("up".to_string()), matchers, modifiers: SelectorModifiers::default() };
        let result = evaluator.evaluate(&expr).unwrap();
        let matrix = result.as_matrix().unwrap();
        assert_eq!(matrix.len(), 1);
        assert_eq!(matrix[0].samples.len(), 3);
    }

    #[test]
    fn aggregation_without_pushdown_groups_by_label() {
        let storage = storage_with(&[("up", "api", 0, 1.0), ("up", "worker", 0, 5.0)]);
        let evaluator = Evaluator::instant(0, 300_000, storage);
        let selector = Expr::VectorSelector { name: Some("up".to_string()), matchers: vec![], modifiers: SelectorModifiers::default() };
        let expr = Expr::Aggregate { op: AggOp::Sum, expr: Box::new(selector), param: None, grouping: super::super::ast::Grouping::default() };
        let result = evaluator.evaluate(&expr).unwrap();
        let v = result.as_vector().unwrap();
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].value, 6.0);
    }
}
