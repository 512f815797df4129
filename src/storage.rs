use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::model::{LabelSet, Matcher, Sample, Series, METRIC_NAME};
use crate::promql::ast::AggOp;

/// A pushdown aggregation request the evaluator may ask a [`Storage`] to
/// perform directly, avoiding a raw-series round trip (§4.D.4).
#[derive(Debug, Clone)]
pub struct AggregateRequest {
    pub op: AggOp,
    pub grouping_keys: Vec<String>,
    pub without: bool,
    pub param: Option<f64>,
}

/// The contract the evaluator uses to read series, the sole boundary between
/// this crate's query engine and whatever block/chunk storage backs it
/// (explicitly out of scope here, per §1).
///
/// `query_aggregate`'s default implementation always reports unsupported,
/// mirroring the original adapter's "pushdown not supported by this adapter"
/// default; adapters opt in by overriding it.
pub trait Storage: Send + Sync {
    fn query(&self, matchers: &[Matcher], start_ms: i64, end_ms: i64) -> Result<Vec<Series>>;

    fn query_aggregate(
        &self,
        matchers: &[Matcher],
        start_ms: i64,
        end_ms: i64,
        request: &AggregateRequest,
    ) -> Result<Option<Vec<Series>>> {
        let _ = (matchers, start_ms, end_ms, request);
        Ok(None)
    }

    fn label_names(&self) -> Result<Vec<String>>;

    fn label_values(&self, name: &str) -> Result<Vec<String>>;

    fn write(&self, _series: &Series) -> Result<()> {
        Err(Error::storage("write not supported by this adapter"))
    }
}

/// An in-memory [`Storage`] reference implementation, used by tests and as a
/// usage example. Series are grouped by their exact label set, matching the
/// teacher's `group_into_series` helper (`promql/types.rs`) generalized from
/// OTel-row shape to this crate's [`Series`].
pub struct MemoryStorage {
    series: RwLock<BTreeMap<LabelSet, Vec<Sample>>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self { series: RwLock::new(BTreeMap::new()) }
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample to the series identified by `labels`, keeping the
    /// series sorted by timestamp (the strictly-increasing invariant is the
    /// caller's responsibility in real ingestion; this helper is test-only
    /// plumbing and tolerates out-of-order inserts by re-sorting).
    pub fn insert(&self, labels: LabelSet, sample: Sample) {
        let mut guard = self.series.write().unwrap();
        let entry = guard.entry(labels).or_default();
        entry.push(sample);
        entry.sort_by_key(|s| s.timestamp_ms);
    }

    fn matches_all(matchers: &[Matcher], labels: &LabelSet) -> bool {
        matchers.iter().all(|m| m.matches(labels.get(&m.name)))
    }
}

impl Storage for MemoryStorage {
    fn query(&self, matchers: &[Matcher], start_ms: i64, end_ms: i64) -> Result<Vec<Series>> {
        let guard = self.series.read().unwrap();
        Ok(guard
            .iter()
            .filter(|(labels, _)| Self::matches_all(matchers, labels))
            .map(|(labels, samples)| {
                let windowed: Vec<Sample> = samples
                    .iter()
                    .filter(|s| s.timestamp_ms >= start_ms && s.timestamp_ms <= end_ms)
                    .copied()
                    .collect();
                Series::with_samples(labels.clone(), windowed)
            })
            .filter(|s| !s.samples.is_empty())
            .collect())
    }

    fn label_names(&self) -> Result<Vec<String>> {
        let guard = self.series.read().unwrap();
        let mut names: Vec<String> = guard
            .keys()
            .flat_map(|ls| ls.iter().map(|(k, _)| k.to_string()))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn label_values(&self, name: &str) -> Result<Vec<String>> {
        let guard = self.series.read().unwrap();
        let mut values: Vec<String> = guard
            .keys()
            .filter_map(|ls| ls.get(name).map(|v| v.to_string()))
            .collect();
        values.sort();
        values.dedup();
        Ok(values)
    }

    fn write(&self, series: &Series) -> Result<()> {
        for sample in &series.samples {
            self.insert(series.labels.clone(), *sample);
        }
        Ok(())
    }
}

/// Build the matcher list for a vector/matrix selector: the parsed matchers
/// plus a synthesized `EQUAL` matcher on `__name__` when the selector has a
/// metric name and no explicit `__name__` matcher is already present.
pub fn matchers_with_name(name: Option<&str>, parsed: &[Matcher]) -> Vec<Matcher> {
    let mut matchers = parsed.to_vec();
    if let Some(name) = name {
        if !matchers.iter().any(|m| m.name == METRIC_NAME) {
            matchers.push(Matcher::equal(METRIC_NAME, name));
        }
    }
    matchers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MatchKind;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().map(|&(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn memory_storage_filters_by_matcher_and_range() {
        let storage = MemoryStorage::new();
        storage.insert(labels(&[(METRIC_NAME, "http_requests_total"), ("job", "api")]), Sample::new(0, 1.0));
        storage.insert(labels(&[(METRIC_NAME, "http_requests_total"), ("job", "api")]), Sample::new(60_000, 2.0));
        storage.insert(labels(&[(METRIC_NAME, "http_requests_total"), ("job", "worker")]), Sample::new(0, 5.0));

        let matchers = vec![Matcher::equal("job", "api")];
        let result = storage.query(&matchers, 0, 60_000).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].samples.len(), 2);
    }

    #[test]
    fn matchers_with_name_synthesizes_name_matcher() {
        let m = matchers_with_name(Some("up"), &[Matcher::equal("job", "api")]);
        assert!(m.iter().any(|m| m.name == METRIC_NAME && m.kind == MatchKind::Equal && m.pattern == "up"));
    }
}
