//! Aggregation operators (§4.D.4), generalizing the teacher's
//! `promql/aggregate.rs` (which grouped `TimeSeries` by a `BTreeMap` group key
//! built from `promql_parser` grouping clauses) onto [`InstantSample`] and
//! this crate's [`AggOp`]/[`Grouping`].

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::model::{InstantSample, LabelSet};
use crate::promql::ast::{AggOp, Grouping};

use super::compute::quantile_sorted;

fn group_key(labels: &LabelSet, grouping: &Grouping) -> LabelSet {
    if grouping.without {
        labels.drop_labels(&grouping.labels, false)
    } else if grouping.labels.is_empty() {
        LabelSet::new()
    } else {
        labels.retain_only(&grouping.labels)
    }
}

/// Aggregate an instant vector into grouped output samples, per §4.D.4.
/// `timestamp_ms` is the evaluation timestamp stamped on every output sample.
pub fn aggregate(op: AggOp, samples: Vec<InstantSample>, grouping: &Grouping, param: Option<f64>, timestamp_ms: i64) -> Result<Vec<InstantSample>> {
    match op {
        AggOp::Topk | AggOp::Bottomk => topk_bottomk(op, samples, param, grouping),
        AggOp::CountValues => Err(Error::internal("count_values takes a label name, not a scalar; call aggregate::count_values directly")),
        _ => {
            let mut groups: HashMap<LabelSet, Vec<f64>> = HashMap::new();
            for s in samples {
                groups.entry(group_key(&s.labels, grouping)).or_default().push(s.value);
            }
            groups
                .into_iter()
                .map(|(labels, values)| {
                    let value = reduce(op, &values, param)?;
                    Ok(InstantSample { labels, timestamp_ms, value })
                })
                .collect()
        }
    }
}

fn reduce(op: AggOp, values: &[f64], param: Option<f64>) -> Result<f64> {
    Ok(match op {
        AggOp::Sum => values.iter().sum(),
        AggOp::Avg => values.iter().sum::<f64>() / values.len() as f64,
        AggOp::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
        AggOp::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        AggOp::Count => values.len() as f64,
        AggOp::Stddev => stdvar(values).sqrt(),
        AggOp::Stdvar => stdvar(values),
        AggOp::Quantile => {
            let phi = param.unwrap_or(0.5);
            if !(0.0..=1.0).contains(&phi) || values.is_empty() {
                f64::NAN
            } else {
                let mut sorted = values.to_vec();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                quantile_sorted(&sorted, phi)
            }
        }
        AggOp::Group => 1.0,
        AggOp::Topk | AggOp::Bottomk | AggOp::CountValues => {
            return Err(Error::internal("reduce() called with a multi-output aggregation op"));
        }
    })
}

fn stdvar(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

fn topk_bottomk(op: AggOp, samples: Vec<InstantSample>, param: Option<f64>, grouping: &Grouping) -> Result<Vec<InstantSample>> {
    let k = param.unwrap_or(0.0);
    if k < 0.0 {
        return Err(Error::semantic("topk/bottomk parameter must be non-negative"));
    }
    let k = k as usize;

    let mut groups: HashMap<LabelSet, Vec<InstantSample>> = HashMap::new();
    for s in samples {
        groups.entry(group_key(&s.labels, grouping)).or_default().push(s);
    }

    let mut out = Vec::new();
    for (_, mut members) in groups {
        members.sort_by(|a, b| {
            let ord = a.value.partial_cmp(&b.value).unwrap_or(std::cmp::Ordering::Equal);
            if op == AggOp::Topk { ord.reverse() } else { ord }
        });
        out.extend(members.into_iter().take(k));
    }
    Ok(out)
}

/// `count_values(label_name, v)`: one output series per distinct input value,
/// with `label_name` set to that value formatted as a string, per §4.D.4.
pub fn count_values(samples: Vec<InstantSample>, label_name: &str, grouping: &Grouping, timestamp_ms: i64) -> Result<Vec<InstantSample>> {
    let mut groups: HashMap<LabelSet, HashMap<String, usize>> = HashMap::new();
    for s in samples {
        let key = group_key(&s.labels, grouping);
        let value_str = format!("{}", s.value);
        *groups.entry(key).or_default().entry(value_str).or_insert(0) += 1;
    }

    let mut out = Vec::new();
    for (base_labels, value_counts) in groups {
        for (value_str, count) in value_counts {
            let mut labels = base_labels.clone();
            labels.insert(label_name, value_str);
            out.push(InstantSample { labels, timestamp_ms, value: count as f64 });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(labels: &[(&str, &str)], value: f64) -> InstantSample {
        InstantSample::new(labels.iter().map(|&(k, v)| (k.to_string(), v.to_string())).collect(), 0, value)
    }

    #[test]
    fn sum_groups_by_label() {
        let samples = vec![
            sample(&[("job", "api"), ("instance", "a")], 1.0),
            sample(&[("job", "api"), ("instance", "b")], 2.0),
            sample(&[("job", "worker"), ("instance", "a")], 10.0),
        ];
        let grouping = Grouping { labels: vec!["job".to_string()], without: false };
        let result = aggregate(AggOp::Sum, samples, &grouping, None, 1000).unwrap();
        let mut by_job: HashMap<String, f64> = HashMap::new();
        for s in result {
            by_job.insert(s.labels.get("job").unwrap().to_string(), s.value);
        }
        assert_eq!(by_job.get("api"), Some(&3.0));
        assert_eq!(by_job.get("worker"), Some(&10.0));
    }

    #[test]
    fn quantile_out_of_range_is_nan() {
        let samples = vec![sample(&[], 1.0), sample(&[], 2.0)];
        let grouping = Grouping::default();
        let result = aggregate(AggOp::Quantile, samples, &grouping, Some(1.5), 0).unwrap();
        assert!(result[0].value.is_nan());
    }

    #[test]
    fn topk_selects_highest_values_with_original_labels() {
        let samples = vec![
            sample(&[("instance", "a")], 1.0),
            sample(&[("instance", "b")], 3.0),
            sample(&[("instance", "c")], 2.0),
        ];
        let grouping = Grouping::default();
        let result = topk_bottomk(AggOp::Topk, samples, Some(2.0), &grouping).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].value, 3.0);
        assert_eq!(result[1].value, 2.0);
    }

    #[test]
    fn count_values_emits_one_series_per_distinct_value() {
        let samples = vec![sample(&[("job", "api")], 1.0), sample(&[("job", "worker")], 1.0), sample(&[("job", "db")], 2.0)];
        let grouping = Grouping::default();
        let result = count_values(samples, "value", &grouping, 0).unwrap();
        assert_eq!(result.len(), 2);
    }
}
