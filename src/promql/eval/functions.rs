//! The function registry (§4.C): a process-wide, read-only table mapping
//! function name to arity metadata, populated once via [`std::sync::OnceLock`]
//! per the spec's "populated once during engine initialization" requirement.
//! Generalizes the teacher's `translate.rs` name-to-enum mapping and
//! `scalar.rs`/`compute.rs` implementations onto this crate's [`Value`] type;
//! the teacher depended on `chrono` for its time functions, dropped from this
//! crate's stack (§B), so the UTC calendar break-down here is hand-rolled
//! (Howard Hinnant's `civil_from_days` algorithm) instead.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::model::{InstantSample, LabelSet, Sample, Series, Value};
use crate::promql::ast::{AggOp, Grouping};

use super::aggregate::aggregate;
use super::compute;

#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    pub min_args: usize,
    pub max_args: Option<usize>,
}

macro_rules! spec {
    ($min:expr, variadic) => { FunctionSpec { min_args: $min, max_args: None } };
    ($min:expr, $max:expr) => { FunctionSpec { min_args: $min, max_args: Some($max) } };
    ($min:expr) => { FunctionSpec { min_args: $min, max_args: Some($min) } };
}

static REGISTRY: OnceLock<HashMap<&'static str, FunctionSpec>> = OnceLock::new();

pub fn registry() -> &'static HashMap<&'static str, FunctionSpec> {
    REGISTRY.get_or_init(|| {
        let mut m = HashMap::new();
        for name in ["rate", "increase", "irate"] {
            m.insert(name, spec!(1));
        }
        for name in [
            "abs", "ceil", "floor", "round", "sqrt", "exp", "ln", "log2", "log10", "sgn", "deg", "rad",
            "sin", "cos", "tan", "asin", "acos", "atan", "sinh", "cosh", "tanh", "asinh", "acosh", "atanh",
        ] {
            m.insert(name, if name == "round" { spec!(1, 2) } else { spec!(1) });
        }
        m.insert("pi", spec!(0));
        m.insert("time", spec!(0));
        for name in ["year", "hour", "minute", "month", "day_of_month", "day_of_week", "days_in_month"] {
            m.insert(name, spec!(0, 1));
        }
        for name in ["last_over_time", "present_over_time", "absent_over_time", "changes"] {
            m.insert(name, spec!(1));
        }
        m.insert("quantile_over_time", spec!(2));
        m.insert("stddev_over_time", spec!(1));
        m.insert("stdvar_over_time", spec!(1));
        for name in ["stddev", "stdvar", "group"] {
            m.insert(name, spec!(1));
        }
        for name in ["topk", "bottomk", "quantile"] {
            m.insert(name, spec!(2));
        }
        m.insert("label_replace", spec!(5));
        m.insert("label_join", spec!(3, variadic));
        m.insert("sort", spec!(1));
        m.insert("sort_desc", spec!(1));
        m.insert("sort_by_label", spec!(2, variadic));
        m.insert("sort_by_label_desc", spec!(2, variadic));
        m.insert("clamp", spec!(3));
        m.insert("clamp_min", spec!(2));
        m.insert("clamp_max", spec!(2));
        m.insert("vector", spec!(1));
        m.insert("scalar", spec!(1));
        m.insert("absent", spec!(1));
        m.insert("delta", spec!(1));
        m.insert("deriv", spec!(1));
        m.insert("predict_linear", spec!(2));
        m.insert("holt_winters", spec!(3));
        m
    })
}

pub fn check_arity(name: &str, arg_count: usize) -> Result<&'static FunctionSpec> {
    let spec = registry().get(name).ok_or_else(|| Error::semantic(format!("unknown function {name}")))?;
    if arg_count < spec.min_args || spec.max_args.is_some_and(|max| arg_count > max) {
        return Err(Error::semantic(format!("{name}: wrong number of arguments ({arg_count})")));
    }
    Ok(spec)
}

/// Dispatch a function call. `at_ms` is the evaluator's current instant,
/// used by zero-arg time functions.
pub fn call(name: &str, args: Vec<Value>, at_ms: i64) -> Result<Value> {
    check_arity(name, args.len())?;
    match name {
        "rate" => range_func(args, compute::compute_rate),
        "increase" => range_func(args, compute::compute_increase),
        "irate" => range_func(args, compute::compute_irate),
        "delta" => range_func(args, compute::compute_delta),
        "deriv" => range_func(args, compute::compute_deriv),
        "last_over_time" => range_func(args, compute::compute_last_over_time),
        "present_over_time" => range_func(args, compute::compute_present_over_time),
        "absent_over_time" => range_func(args, compute::compute_absent_over_time),
        "changes" => range_func(args, compute::compute_changes),
        "stddev_over_time" => range_func(args, compute::compute_stddev_over_time),
        "stdvar_over_time" => range_func(args, compute::compute_stdvar_over_time),
        "quantile_over_time" => {
            let phi = scalar_arg(&args, 0)?;
            range_func(args.into_iter().skip(1).collect(), move |s| compute::compute_quantile_over_time(phi, s))
        }
        "predict_linear" => {
            let t = scalar_arg(&args, 1)?;
            range_func(args.into_iter().take(1).collect(), move |s| compute::compute_predict_linear(s, t))
        }
        "holt_winters" => holt_winters(args),

        "abs" => elementwise(args, f64::abs),
        "ceil" => elementwise(args, f64::ceil),
        "floor" => elementwise(args, f64::floor),
        "round" => {
            let to = if args.len() > 1 { scalar_arg(&args, 1)? } else { 1.0 };
            elementwise(args.into_iter().take(1).collect(), move |v| if to == 0.0 { v } else { (v / to).round() * to })
        }
        "sqrt" => elementwise(args, f64::sqrt),
        "exp" => elementwise(args, f64::exp),
        "ln" => elementwise(args, f64::ln),
        "log2" => elementwise(args, f64::log2),
        "log10" => elementwise(args, f64::log10),
        "sgn" => elementwise(args, |v| if v > 0.0 { 1.0 } else if v < 0.0 { -1.0 } else { 0.0 }),
        "deg" => elementwise(args, f64::to_degrees),
        "rad" => elementwise(args, f64::to_radians),
        "sin" => elementwise(args, f64::sin),
        "cos" => elementwise(args, f64::cos),
        "tan" => elementwise(args, f64::tan),
        "asin" => elementwise(args, f64::asin),
        "acos" => elementwise(args, f64::acos),
        "atan" => elementwise(args, f64::atan),
        "sinh" => elementwise(args, f64::sinh),
        "cosh" => elementwise(args, f64::cosh),
        "tanh" => elementwise(args, f64::tanh),
        "asinh" => elementwise(args, f64::asinh),
        "acosh" => elementwise(args, f64::acosh),
        "atanh" => elementwise(args, f64::atanh),

        "pi" => Ok(Value::Scalar { timestamp_ms: at_ms, value: std::f64::consts::PI }),
        "time" => Ok(Value::Scalar { timestamp_ms: at_ms, value: at_ms as f64 / 1000.0 }),
        "year" => time_component(args, at_ms, |c| c.year as f64),
        "month" => time_component(args, at_ms, |c| c.month as f64),
        "day_of_month" => time_component(args, at_ms, |c| c.day as f64),
        "day_of_week" => time_component(args, at_ms, |c| c.weekday as f64),
        "days_in_month" => time_component(args, at_ms, |c| c.days_in_month as f64),
        "hour" => time_component(args, at_ms, |c| c.hour as f64),
        "minute" => time_component(args, at_ms, |c| c.minute as f64),

        "stddev" | "stdvar" | "group" => whole_vector_aggregate(name, args, None, at_ms),
        "topk" | "bottomk" | "quantile" => {
            let param = scalar_arg(&args, 0)?;
            whole_vector_aggregate(name, args.into_iter().skip(1).collect(), Some(param), at_ms)
        }
        "label_replace" => label_replace(args),
        "label_join" => label_join(args),
        "sort" => sort_vector(args, false),
        "sort_desc" => sort_vector(args, true),
        "sort_by_label" => sort_by_label(args, false),
        "sort_by_label_desc" => sort_by_label(args, true),
        "clamp" => {
            let (min, max) = (scalar_arg(&args, 1)?, scalar_arg(&args, 2)?);
            elementwise(args.into_iter().take(1).collect(), move |v| v.clamp(min.min(max), max.max(min)))
        }
        "clamp_min" => {
            let min = scalar_arg(&args, 1)?;
            elementwise(args.into_iter().take(1).collect(), move |v| v.max(min))
        }
        "clamp_max" => {
            let max = scalar_arg(&args, 1)?;
            elementwise(args.into_iter().take(1).collect(), move |v| v.min(max))
        }
        "vector" => {
            let v = scalar_arg(&args, 0)?;
            Ok(Value::Vector(vec![InstantSample::new(LabelSet::new(), at_ms, v)]))
        }
        "scalar" => {
            let vector = vector_arg(&args, 0)?;
            Ok(Value::Scalar { timestamp_ms: at_ms, value: if vector.len() == 1 { vector[0].value } else { f64::NAN } })
        }
        "absent" => {
            let vector = vector_arg(&args, 0)?;
            if vector.is_empty() {
                Ok(Value::Vector(vec![InstantSample::new(LabelSet::new(), at_ms, 1.0)]))
            } else {
                Ok(Value::empty_vector())
            }
        }

        _ => Err(Error::semantic(format!("unimplemented function {name}"))),
    }
}

fn scalar_arg(args: &[Value], i: usize) -> Result<f64> {
    args.get(i).and_then(Value::as_scalar).ok_or_else(|| Error::semantic(format!("argument {i} must be a scalar")))
}

fn vector_arg(args: &[Value], i: usize) -> Result<Vec<InstantSample>> {
    args.get(i).and_then(Value::as_vector).map(<[InstantSample]>::to_vec).ok_or_else(|| Error::semantic(format!("argument {i} must be a vector")))
}

/// Collapses each matrix series to a single value via `f`, one output sample
/// per input series, `__name__` stripped.
fn range_func(mut args: Vec<Value>, f: impl Fn(&[Sample]) -> Option<f64>) -> Result<Value> {
    let Value::Matrix(matrix) = args.remove(0) else {
        return Err(Error::semantic("range function expects a matrix selector argument"));
    };
    let out = matrix
        .into_iter()
        .filter_map(|series| {
            let value = f(&series.samples)?;
            let timestamp_ms = series.samples.last()?.timestamp_ms;
            Some(InstantSample { labels: series.labels.without_metric_name(), timestamp_ms, value })
        })
        .collect();
    Ok(Value::Vector(out))
}

fn elementwise(mut args: Vec<Value>, f: impl Fn(f64) -> f64) -> Result<Value> {
    match args.remove(0) {
        Value::Scalar { timestamp_ms, value } => Ok(Value::Scalar { timestamp_ms, value: f(value) }),
        Value::Vector(v) => Ok(Value::Vector(
            v.into_iter().map(|s| InstantSample { labels: s.labels, timestamp_ms: s.timestamp_ms, value: f(s.value) }).collect(),
        )),
        _ => Err(Error::semantic("expected a scalar or vector argument")),
    }
}

fn whole_vector_aggregate(name: &str, args: Vec<Value>, param: Option<f64>, at_ms: i64) -> Result<Value> {
    let op = match name {
        "stddev" => AggOp::Stddev,
        "stdvar" => AggOp::Stdvar,
        "group" => AggOp::Group,
        "topk" => AggOp::Topk,
        "bottomk" => AggOp::Bottomk,
        "quantile" => AggOp::Quantile,
        _ => unreachable!(),
    };
    let vector = vector_arg(&args, 0)?;
    let result = aggregate(op, vector, &Grouping::default(), param, at_ms)?;
    Ok(Value::Vector(result))
}

fn label_replace(mut args: Vec<Value>) -> Result<Value> {
    let regex_pattern = match args.pop().unwrap() {
        Value::String { value, .. } => value,
        _ => return Err(Error::semantic("label_replace: regex must be a string")),
    };
    let src = match args.pop().unwrap() {
        Value::String { value, .. } => value,
        _ => return Err(Error::semantic("label_replace: src_label must be a string")),
    };
    let replacement = match args.pop().unwrap() {
        Value::String { value, .. } => value,
        _ => return Err(Error::semantic("label_replace: replacement must be a string")),
    };
    let dst = match args.pop().unwrap() {
        Value::String { value, .. } => value,
        _ => return Err(Error::semantic("label_replace: dst_label must be a string")),
    };
    let Value::Vector(vector) = args.pop().unwrap() else {
        return Err(Error::semantic("label_replace: first argument must be a vector"));
    };

    let anchored = format!("^(?:{regex_pattern})$");
    let re = match Regex::new(&anchored) {
        Ok(re) => re,
        // §4.D.7: regex compile failure reverts to the input vector unchanged.
        Err(_) => return Ok(Value::Vector(vector)),
    };

    let out = vector
        .into_iter()
        .map(|mut s| {
            let src_value = s.labels.get(&src).unwrap_or("").to_string();
            if let Some(caps) = re.captures(&src_value) {
                let mut expanded = String::new();
                caps.expand(&replacement, &mut expanded);
                s.labels.insert(dst.clone(), expanded);
            }
            s
        })
        .collect();
    Ok(Value::Vector(out))
}

fn label_join(mut args: Vec<Value>) -> Result<Value> {
    let src_labels: Vec<String> = args
        .drain(3..)
        .map(|a| match a {
            Value::String { value, .. } => Ok(value),
            _ => Err(Error::semantic("label_join: source labels must be strings")),
        })
        .collect::<Result<_>>()?;
    let Value::String { value: sep, .. } = args.remove(2) else { return Err(Error::semantic("label_join: separator must be a string")) };
    let Value::String { value: dst, .. } = args.remove(1) else { return Err(Error::semantic("label_join: dst_label must be a string")) };
    let Value::Vector(vector) = args.remove(0) else { return Err(Error::semantic("label_join: first argument must be a vector")) };

    let out = vector
        .into_iter()
        .map(|mut s| {
            let joined = src_labels.iter().map(|l| s.labels.get(l).unwrap_or("")).collect::<Vec<_>>().join(&sep);
            s.labels.insert(dst.clone(), joined);
            s
        })
        .collect();
    Ok(Value::Vector(out))
}

fn sort_vector(args: Vec<Value>, desc: bool) -> Result<Value> {
    let mut vector = vector_arg(&args, 0)?;
    vector.sort_by(|a, b| {
        let ord = a.value.partial_cmp(&b.value).unwrap_or(std::cmp::Ordering::Equal);
        if desc { ord.reverse() } else { ord }
    });
    Ok(Value::Vector(vector))
}

fn sort_by_label(args: Vec<Value>, desc: bool) -> Result<Value> {
    let labels: Vec<String> = args[1..]
        .iter()
        .map(|a| match a {
            Value::String { value, .. } => Ok(value.clone()),
            _ => Err(Error::semantic("sort_by_label: label names must be strings")),
        })
        .collect::<Result<_>>()?;
    let mut vector = vector_arg(&args, 0)?;
    vector.sort_by(|a, b| {
        for l in &labels {
            let ord = a.labels.get(l).unwrap_or("").cmp(b.labels.get(l).unwrap_or(""));
            if ord != std::cmp::Ordering::Equal {
                return if desc { ord.reverse() } else { ord };
            }
        }
        std::cmp::Ordering::Equal
    });
    Ok(Value::Vector(vector))
}

fn holt_winters(args: Vec<Value>) -> Result<Value> {
    let sf = scalar_arg(&args, 1)?;
    let tf = scalar_arg(&args, 2)?;
    if !(0.0..=1.0).contains(&sf) || !(0.0..=1.0).contains(&tf) {
        return Err(Error::semantic("holt_winters: smoothing factors must be in [0, 1]"));
    }
    range_func(args.into_iter().take(1).collect(), move |samples| double_exponential_smoothing(samples, sf, tf))
}

fn double_exponential_smoothing(samples: &[Sample], sf: f64, tf: f64) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let mut level = samples[0].value;
    let mut trend = samples[1].value - samples[0].value;
    for s in &samples[1..] {
        let last_level = level;
        level = sf * s.value + (1.0 - sf) * (level + trend);
        trend = tf * (level - last_level) + (1.0 - tf) * trend;
    }
    Some(level)
}

struct Civil {
    year: i64,
    month: i64,
    day: i64,
    hour: i64,
    minute: i64,
    weekday: i64,
    days_in_month: i64,
}

/// Breaks a millisecond epoch timestamp into its UTC calendar components
/// using Howard Hinnant's `civil_from_days`, avoiding a `chrono` dependency
/// for a handful of date-arithmetic functions.
fn civil_from_epoch_ms(ms: i64) -> Civil {
    let total_seconds = ms.div_euclid(1000);
    let days = total_seconds.div_euclid(86_400);
    let secs_of_day = total_seconds.rem_euclid(86_400);

    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { y + 1 } else { y };

    let weekday = (days.rem_euclid(7) + 4).rem_euclid(7); // 1970-01-01 was a Thursday (4)
    let is_leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
    let days_in_month = match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => if is_leap { 29 } else { 28 },
        _ => unreachable!(),
    };

    Civil { year, month, day, hour: secs_of_day / 3600, minute: (secs_of_day % 3600) / 60, weekday, days_in_month }
}

fn time_component(args: Vec<Value>, at_ms: i64, f: impl Fn(Civil) -> f64) -> Result<Value> {
    if args.is_empty() {
        return Ok(Value::Scalar { timestamp_ms: at_ms, value: f(civil_from_epoch_ms(at_ms)) });
    }
    let vector = vector_arg(&args, 0)?;
    Ok(Value::Vector(
        vector
            .into_iter()
            .map(|s| InstantSample { labels: s.labels.without_metric_name(), timestamp_ms: s.timestamp_ms, value: f(civil_from_epoch_ms(s.timestamp_ms)) })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix_value(samples: &[(i64, f64)]) -> Value {
        Value::Matrix(vec![Series::with_samples(LabelSet::new(), samples.iter().map(|&(t, v)| Sample::new(t, v)).collect())])
    }

    #[test]
    fn rate_strips_name_and_produces_one_sample_per_series() {
        let result = call("rate", vec![matrix_value(&[(0, 0.0), (60_000, 60.0)])], 60_000).unwrap();
        let v = result.as_vector().unwrap();
        assert_eq!(v.len(), 1);
        assert!((v[0].value - 1.0).abs() < 0.001);
    }

    #[test]
    fn abs_applies_elementwise_to_a_vector() {
        let vector = Value::Vector(vec![InstantSample::new(LabelSet::new(), 0, -5.0)]);
        let result = call("abs", vec![vector], 0).unwrap();
        assert_eq!(result.as_vector().unwrap()[0].value, 5.0);
    }

    #[test]
    fn civil_from_epoch_ms_decodes_known_date() {
        // 2021-01-01T00:00:00Z = 1609459200000 ms
        let c = civil_from_epoch_ms(1_609_459_200_000);
        assert_eq!(c.year, 2021);
        assert_eq!(c.month, 1);
        assert_eq!(c.day, 1);
        assert_eq!(c.weekday, 5); // Friday
    }

    #[test]
    fn days_in_month_accounts_for_leap_year() {
        // 2024-02-15T00:00:00Z
        let c = civil_from_epoch_ms(1_707_955_200_000);
        assert_eq!(c.days_in_month, 29);
    }

    #[test]
    fn label_replace_applies_capture_groups() {
        let vector = Value::Vector(vec![InstantSample::new(
            [("instance".to_string(), "host-42:9100".to_string())].into_iter().collect(),
            0,
            1.0,
        )]);
        let args = vec![
            vector,
            Value::String { timestamp_ms: 0, value: "host".to_string() },
            Value::String { timestamp_ms: 0, value: "$1".to_string() },
            Value::String { timestamp_ms: 0, value: "instance".to_string() },
            Value::String { timestamp_ms: 0, value: "host-(.*):.*".to_string() },
        ];
        let result = call("label_replace", args, 0).unwrap();
        let v = result.as_vector().unwrap();
        assert_eq!(v[0].labels.get("host"), Some("42"));
    }

    #[test]
    fn clamp_bounds_values_on_both_sides() {
        let vector = Value::Vector(vec![InstantSample::new(LabelSet::new(), 0, 150.0)]);
        let args = vec![vector, Value::Scalar { timestamp_ms: 0, value: 0.0 }, Value::Scalar { timestamp_ms: 0, value: 100.0 }];
        let result = call("clamp", args, 0).unwrap();
        assert_eq!(result.as_vector().unwrap()[0].value, 100.0);
    }

    #[test]
    fn sort_orders_ascending_by_value() {
        let vector = Value::Vector(vec![
            InstantSample::new(LabelSet::new(), 0, 3.0),
            InstantSample::new(LabelSet::new(), 0, 1.0),
            InstantSample::new(LabelSet::new(), 0, 2.0),
        ]);
        let result = call("sort", vec![vector], 0).unwrap();
        let values: Vec<f64> = result.as_vector().unwrap().iter().map(|s| s.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn wrong_arity_is_rejected() {
        assert!(check_arity("rate", 0).is_err());
        assert!(check_arity("rate", 1).is_ok());
        assert!(check_arity("clamp", 2).is_err());
    }
}
