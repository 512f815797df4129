//! Binary operator evaluation and vector matching (§4.D.3, §4.D.3a).
//!
//! Generalizes the teacher's `promql/binary.rs` (which matched on
//! `promql_parser`'s `TokenType`/`VectorMatchCardinality` over `TimeSeries`)
//! onto this crate's [`BinaryOp`]/[`Cardinality`] and [`InstantSample`] types.
//! Division by zero here yields `+Inf` and modulo by zero yields `NaN` — the
//! teacher's version produced `NaN` for both, which does not match Prometheus
//! or this crate's arithmetic contract.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::model::{InstantSample, LabelSet, Value};
use crate::promql::ast::{BinModifier, BinaryOp, Cardinality};

/// Evaluate `lhs op rhs` at the instant-query level, where either side may be
/// a `Scalar` or a `Vector`. Matrices are not valid binary operands and are a
/// caller bug, not a user-facing error — dispatch must not reach here with one.
pub fn apply_binary(op: BinaryOp, lhs: Value, rhs: Value, modifier: &BinModifier) -> Result<Value> {
    match (lhs, rhs) {
        (Value::Scalar { value: l, .. }, Value::Scalar { value: r, timestamp_ms }) => {
            if op.is_set_op() {
                // Scalar `and`/`or`/`unless` has no defined semantics; Prometheus
                // rejects it at parse time. We fail closed instead.
                return Err(Error::semantic("set operators require vector operands"));
            }
            let value = eval_scalar_op(op, l, r, modifier.return_bool).unwrap_or(f64::NAN);
            Ok(Value::Scalar { timestamp_ms, value })
        }
        (Value::Vector(v), Value::Scalar { value: s, .. }) => {
            Ok(Value::Vector(apply_vector_scalar(op, v, s, modifier.return_bool, false)))
        }
        (Value::Scalar { value: s, .. }, Value::Vector(v)) => {
            Ok(Value::Vector(apply_vector_scalar(op, v, s, modifier.return_bool, true)))
        }
        (Value::Vector(l), Value::Vector(r)) => {
            if op.is_set_op() {
                Ok(Value::Vector(apply_set_op(op, l, r, modifier)))
            } else {
                Ok(Value::Vector(apply_vector_vector(op, l, r, modifier)?))
            }
        }
        _ => Err(Error::semantic("binary operator requires scalar or vector operands")),
    }
}

fn eval_scalar_op(op: BinaryOp, l: f64, r: f64, return_bool: bool) -> Option<f64> {
    match op {
        BinaryOp::Add => Some(l + r),
        BinaryOp::Sub => Some(l - r),
        BinaryOp::Mul => Some(l * r),
        BinaryOp::Div => Some(if r == 0.0 { l.signum() * f64::INFINITY } else { l / r }),
        BinaryOp::Mod => Some(if r == 0.0 { f64::NAN } else { l % r }),
        BinaryOp::Pow => Some(l.powf(r)),
        BinaryOp::Eql => comparison(l == r, l, return_bool),
        BinaryOp::Neq => comparison(l != r, l, return_bool),
        BinaryOp::Lss => comparison(l < r, l, return_bool),
        BinaryOp::Gtr => comparison(l > r, l, return_bool),
        BinaryOp::Lte => comparison(l <= r, l, return_bool),
        BinaryOp::Gte => comparison(l >= r, l, return_bool),
        BinaryOp::And | BinaryOp::Or | BinaryOp::Unless => None,
    }
}

fn comparison(cond: bool, value: f64, return_bool: bool) -> Option<f64> {
    if return_bool {
        Some(if cond { 1.0 } else { 0.0 })
    } else if cond {
        Some(value)
    } else {
        None
    }
}

fn apply_vector_scalar(op: BinaryOp, vector: Vec<InstantSample>, scalar: f64, return_bool: bool, scalar_on_lhs: bool) -> Vec<InstantSample> {
    vector
        .into_iter()
        .filter_map(|sample| {
            let (l, r) = if scalar_on_lhs { (scalar, sample.value) } else { (sample.value, scalar) };
            let value = eval_scalar_op(op, l, r, return_bool)?;
            Some(InstantSample { labels: sample.labels.without_metric_name(), timestamp_ms: sample.timestamp_ms, value })
        })
        .collect()
}

fn signature(labels: &LabelSet, match_labels: &[String], on: bool) -> LabelSet {
    if on {
        labels.retain_only(match_labels)
    } else {
        labels.drop_labels(match_labels, false)
    }
}

fn apply_set_op(op: BinaryOp, lhs: Vec<InstantSample>, rhs: Vec<InstantSample>, modifier: &BinModifier) -> Vec<InstantSample> {
    let (match_labels, on): (&[String], bool) = match &modifier.matching {
        Some(m) => (&m.labels, m.on),
        None => (&[], false),
    };

    let rhs_sigs: std::collections::HashSet<LabelSet> =
        rhs.iter().map(|s| signature(&s.labels, match_labels, on)).collect();

    match op {
        BinaryOp::And => lhs
            .into_iter()
            .filter(|s| rhs_sigs.contains(&signature(&s.labels, match_labels, on)))
            .collect(),
        BinaryOp::Unless => lhs
            .into_iter()
            .filter(|s| !rhs_sigs.contains(&signature(&s.labels, match_labels, on)))
            .collect(),
        BinaryOp::Or => {
            let lhs_sigs: std::collections::HashSet<LabelSet> =
                lhs.iter().map(|s| signature(&s.labels, match_labels, on)).collect();
            let mut result = lhs;
            for s in rhs {
                if !lhs_sigs.contains(&signature(&s.labels, match_labels, on)) {
                    result.push(s);
                }
            }
            result
        }
        _ => unreachable!("apply_set_op called with a non-set operator"),
    }
}

fn apply_vector_vector(op: BinaryOp, lhs: Vec<InstantSample>, rhs: Vec<InstantSample>, modifier: &BinModifier) -> Result<Vec<InstantSample>> {
    let (match_labels, on): (&[String], bool) = match &modifier.matching {
        Some(m) => (&m.labels, m.on),
        None => (&[], false),
    };
    let card = modifier.matching.as_ref().map(|m| &m.card).cloned().unwrap_or(Cardinality::OneToOne);

    let mut rhs_by_sig: HashMap<LabelSet, Vec<&InstantSample>> = HashMap::new();
    for s in &rhs {
        rhs_by_sig.entry(signature(&s.labels, match_labels, on)).or_default().push(s);
    }

    // Validate RHS uniqueness up front for the "one" side of any cardinality
    // other than many-to-many, per §4.D.3a.
    let rhs_must_be_unique = matches!(card, Cardinality::OneToOne | Cardinality::ManyToOne(_));
    if rhs_must_be_unique {
        for (sig, matches) in &rhs_by_sig {
            if matches.len() > 1 {
                return Err(Error::semantic(format!(
                    "many-to-one matching must be explicit (signature {:?} matches {} series on the one side)",
                    sig, matches.len()
                )));
            }
        }
    }

    let incl: &[String] = match &card {
        Cardinality::ManyToOne(incl) | Cardinality::OneToMany(incl) => incl,
        _ => &[],
    };

    let mut seen_one_side: HashMap<LabelSet, LabelSet> = HashMap::new();
    let mut results = Vec::new();

    for l in &lhs {
        let sig = signature(&l.labels, match_labels, on);
        let Some(matches) = rhs_by_sig.get(&sig) else { continue };

        if matches!(card, Cardinality::OneToOne) && matches.len() > 1 {
            return Err(Error::semantic("one-to-one matching must be unique"));
        }

        for r in matches {
            let value = match eval_scalar_op(op, l.value, r.value, modifier.return_bool) {
                Some(v) => v,
                None => continue,
            };

            let (many_side, one_side): (&InstantSample, &InstantSample) = match card {
                Cardinality::OneToMany(_) => (r, l),
                _ => (l, r),
            };

            let mut labels = many_side.labels.without_metric_name();
            for name in incl {
                if let Some(v) = one_side.labels.get(name) {
                    labels.insert(name.to_string(), v.to_string());
                }
            }
            if matches!(card, Cardinality::OneToOne) && on {
                labels = labels.retain_only(match_labels);
            }

            // Track group_left/group_right uniqueness on the "many" side's
            // signature against a single "one" side — a second distinct
            // match to the same many-side signature is ambiguous.
            if !matches!(card, Cardinality::ManyToMany) {
                let many_sig = signature(&many_side.labels, match_labels, on);
                if let Some(existing) = seen_one_side.get(&many_sig) {
                    if existing != &one_side.labels {
                        return Err(Error::semantic("many-to-one matching must be unique"));
                    }
                } else {
                    seen_one_side.insert(many_sig, one_side.labels.clone());
                }
            }

            results.push(InstantSample { labels, timestamp_ms: l.timestamp_ms, value });
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promql::ast::VectorMatching;

    fn sample(labels: &[(&str, &str)], value: f64) -> InstantSample {
        InstantSample::new(labels.iter().map(|&(k, v)| (k.to_string(), v.to_string())).collect(), 0, value)
    }

    #[test]
    fn division_by_zero_is_positive_infinity() {
        let r = eval_scalar_op(BinaryOp::Div, 5.0, 0.0, false).unwrap();
        assert!(r.is_infinite() && r.is_sign_positive());
    }

    #[test]
    fn modulo_by_zero_is_nan() {
        let r = eval_scalar_op(BinaryOp::Mod, 5.0, 0.0, false).unwrap();
        assert!(r.is_nan());
    }

    #[test]
    fn comparison_without_bool_filters_and_keeps_original_value() {
        assert_eq!(comparison(true, 42.0, false), Some(42.0));
        assert_eq!(comparison(false, 42.0, false), None);
        assert_eq!(comparison(true, 42.0, true), Some(1.0));
        assert_eq!(comparison(false, 42.0, true), Some(0.0));
    }

    #[test]
    fn group_left_copies_included_label_from_one_side() {
        let lhs = vec![sample(&[("method", "GET"), ("handler", "/api")], 1000.0)];
        let rhs = vec![sample(&[("method", "GET")], 10.0)];
        let modifier = BinModifier {
            return_bool: false,
            matching: Some(VectorMatching {
                on: true,
                labels: vec!["method".to_string()],
                card: Cardinality::ManyToOne(vec!["handler".to_string()]),
            }),
        };
        let result = apply_vector_vector(BinaryOp::Mul, lhs, rhs, &modifier).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].value, 10000.0);
        assert_eq!(result[0].labels.get("handler"), Some("/api"));
        assert_eq!(result[0].labels.get("__name__"), None);
    }

    #[test]
    fn one_to_one_ambiguous_match_is_an_error() {
        let lhs = vec![sample(&[("job", "api")], 1.0)];
        let rhs = vec![sample(&[("job", "api"), ("instance", "a")], 2.0), sample(&[("job", "api"), ("instance", "b")], 3.0)];
        let modifier = BinModifier { return_bool: false, matching: Some(VectorMatching { on: true, labels: vec!["job".to_string()], card: Cardinality::OneToOne }) };
        assert!(apply_vector_vector(BinaryOp::Add, lhs, rhs, &modifier).is_err());
    }

    #[test]
    fn set_op_and_keeps_lhs_with_match_on_rhs() {
        let lhs = vec![sample(&[("job", "api")], 1.0), sample(&[("job", "worker")], 2.0)];
        let rhs = vec![sample(&[("job", "api")], 0.0)];
        let modifier = BinModifier::default();
        let result = apply_set_op(BinaryOp::And, lhs, rhs, &modifier);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].labels.get("job"), Some("api"));
    }
}
