use std::collections::BTreeMap;

/// Reserved label name carrying the metric name.
pub const METRIC_NAME: &str = "__name__";

/// An unordered mapping from label name to label value. Both are non-empty
/// ASCII strings outside of matcher semantics at query time.
///
/// Backed by a `BTreeMap` rather than a `HashMap`: the evaluator and shard
/// dispatcher both need a canonical, deterministically ordered iteration to
/// build signature/hash strings, and label sets are small enough that the
/// ordering cost is negligible.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn from_map(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn metric_name(&self) -> Option<&str> {
        self.get(METRIC_NAME)
    }

    /// Returns a copy with `__name__` removed, as required wherever arithmetic,
    /// comparison, or aggregation results are produced (label hygiene, P3).
    pub fn without_metric_name(&self) -> Self {
        let mut out = self.clone();
        out.remove(METRIC_NAME);
        out
    }

    /// Returns a copy retaining only the given label names.
    pub fn retain_only(&self, names: &[String]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(k, _)| names.iter().any(|n| n == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Returns a copy dropping the given label names (and always `__name__`
    /// unless `keep_metric_name` is set), used to build aggregation group keys
    /// and vector-matching signatures.
    pub fn drop_labels(&self, names: &[String], keep_metric_name: bool) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(k, _)| {
                    let is_metric = k.as_str() == METRIC_NAME;
                    if is_metric && !keep_metric_name {
                        return false;
                    }
                    !names.iter().any(|n| n == *k)
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Canonical string used for shard hashing and cache keys: a
    /// deterministic, comma-joined `name=value` list in sorted order, since
    /// the backing map already iterates in sorted order.
    pub fn canonical_string(&self) -> String {
        let mut s = String::new();
        for (k, v) in self.iter() {
            s.push_str(k);
            s.push('=');
            s.push_str(v);
            s.push(',');
        }
        s
    }
}

impl FromIterator<(String, String)> for LabelSet {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Is `name` a syntactically valid label name? `[a-zA-Z_][a-zA-Z_0-9]*`,
/// with metric names (checked separately) additionally permitting `:`.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Is `name` a syntactically valid metric name? Same as a label name, but
/// `:` is also permitted (recording rule convention).
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn without_metric_name_drops_only_name() {
        let mut ls = LabelSet::new();
        ls.insert(METRIC_NAME, "http_requests_total");
        ls.insert("job", "api");
        let stripped = ls.without_metric_name();
        assert_eq!(stripped.metric_name(), None);
        assert_eq!(stripped.get("job"), Some("api"));
    }

    #[test]
    fn label_name_validation() {
        assert!(is_valid_label_name("job"));
        assert!(is_valid_label_name("_internal"));
        assert!(!is_valid_label_name("1job"));
        assert!(!is_valid_label_name("job-name"));
        assert!(is_valid_metric_name("http:requests:rate5m"));
        assert!(!is_valid_label_name("http:requests:rate5m"));
    }

    #[test]
    fn canonical_string_is_order_independent_of_insertion() {
        let mut a = LabelSet::new();
        a.insert("b", "2");
        a.insert("a", "1");
        let mut b = LabelSet::new();
        b.insert("a", "1");
        b.insert("b", "2");
        assert_eq!(a.canonical_string(), b.canonical_string());
    }
}
