use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use arc_swap::ArcSwap;
use regex::Regex;

use crate::model::{LabelSet, METRIC_NAME};

/// A node in the metric-name prefix trie. Mirrors
/// `examples/original_source/src/tsdb/storage/rule_manager.cpp`'s `TrieNode`:
/// children indexed by character, with a leaf flag marking "everything from
/// here down is dropped."
#[derive(Debug, Clone, Default)]
struct TrieNode {
    children: HashMap<char, Box<TrieNode>>,
    is_leaf: bool,
}

impl TrieNode {
    fn insert(&mut self, prefix: &str) {
        let mut node = self;
        for ch in prefix.chars() {
            node = node.children.entry(ch).or_default();
        }
        node.is_leaf = true;
    }

    /// Does any prefix of `name` terminate at a leaf?
    fn matches_prefix(&self, name: &str) -> bool {
        let mut node = self;
        if node.is_leaf {
            return true;
        }
        for ch in name.chars() {
            match node.children.get(&ch) {
                Some(next) => {
                    node = next;
                    if node.is_leaf {
                        return true;
                    }
                }
                None => return false,
            }
        }
        false
    }
}

/// Per-label drop rule: an exact-value set plus a regex list.
#[derive(Debug, Clone, Default)]
struct LabelDropRule {
    values: HashSet<String>,
    regexes: Vec<Regex>,
}

impl LabelDropRule {
    fn matches(&self, value: &str) -> bool {
        self.values.contains(value) || self.regexes.iter().any(|re| re.is_match(value))
    }
}

/// Immutable bundle of drop/keep decisions applied at ingestion. Once
/// published, a `RuleSet` is never mutated; [`RuleManager`] replaces the
/// published pointer atomically.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    exact_names: HashSet<String>,
    prefix_trie: TrieNode,
    name_regexes: Vec<Regex>,
    label_rules: HashMap<String, LabelDropRule>,
    // Mapping rules are reserved for future use, matching the original
    // adapter's `apply_mapping` placeholder that returns its input unchanged.
}

impl RuleSet {
    pub fn builder() -> RuleSetBuilder {
        RuleSetBuilder::default()
    }

    /// Should `labels` be dropped at ingestion?
    pub fn should_drop(&self, labels: &LabelSet) -> bool {
        if let Some(name) = labels.get(METRIC_NAME) {
            if self.exact_names.contains(name) {
                return true;
            }
            if self.prefix_trie.matches_prefix(name) {
                return true;
            }
            if self.name_regexes.iter().any(|re| re.is_match(name)) {
                return true;
            }
        }
        for (label_name, rule) in &self.label_rules {
            if let Some(value) = labels.get(label_name) {
                if rule.matches(value) {
                    return true;
                }
            }
        }
        false
    }

    /// Reserved for future use; currently the identity mapping, matching the
    /// original `apply_mapping` placeholder.
    pub fn apply_mapping(&self, labels: LabelSet) -> LabelSet {
        labels
    }
}

#[derive(Debug, Default)]
pub struct RuleSetBuilder {
    exact_names: HashSet<String>,
    prefix_trie: TrieNode,
    name_regexes: Vec<Regex>,
    label_rules: HashMap<String, LabelDropRule>,
}

impl RuleSetBuilder {
    pub fn drop_exact_name(mut self, name: impl Into<String>) -> Self {
        self.exact_names.insert(name.into());
        self
    }

    pub fn drop_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.prefix_trie.insert(prefix.as_ref());
        self
    }

    pub fn drop_name_regex(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.name_regexes.push(Regex::new(&format!("^(?:{pattern})$"))?);
        Ok(self)
    }

    pub fn drop_label_value(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.label_rules.entry(label.into()).or_default().values.insert(value.into());
        self
    }

    pub fn drop_label_regex(mut self, label: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        let re = Regex::new(&format!("^(?:{pattern})$"))?;
        self.label_rules.entry(label.into()).or_default().regexes.push(re);
        Ok(self)
    }

    pub fn build(self) -> RuleSet {
        RuleSet {
            exact_names: self.exact_names,
            prefix_trie: self.prefix_trie,
            name_regexes: self.name_regexes,
            label_rules: self.label_rules,
        }
    }
}

/// Publishes an atomically-swappable [`RuleSet`]. Writers serialize through a
/// single mutex, clone-modify-publish; readers always load the current
/// `Arc<RuleSet>` and hold their copy for the duration of their operation, so
/// a rule update mid-flight never tears a reader's view (§4.G, §9).
pub struct RuleManager {
    current: ArcSwap<RuleSet>,
    writer_lock: Mutex<()>,
}

impl Default for RuleManager {
    fn default() -> Self {
        Self { current: ArcSwap::from_pointee(RuleSet::default()), writer_lock: Mutex::new(()) }
    }
}

impl RuleManager {
    pub fn new(initial: RuleSet) -> Self {
        Self { current: ArcSwap::from_pointee(initial), writer_lock: Mutex::new(()) }
    }

    /// Acquire-load the currently published rule set.
    pub fn current(&self) -> arc_swap::Guard<std::sync::Arc<RuleSet>> {
        self.current.load()
    }

    /// Replace the published rule set, serialized against other writers.
    pub fn publish(&self, new_set: RuleSet) {
        let _guard = self.writer_lock.lock().unwrap();
        self.current.store(std::sync::Arc::new(new_set));
    }

    pub fn should_drop(&self, labels: &LabelSet) -> bool {
        self.current().should_drop(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().map(|&(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn exact_name_drop() {
        let rs = RuleSet::builder().drop_exact_name("debug_metric").build();
        assert!(rs.should_drop(&labels(&[(METRIC_NAME, "debug_metric")])));
        assert!(!rs.should_drop(&labels(&[(METRIC_NAME, "http_requests_total")])));
    }

    #[test]
    fn prefix_trie_drop() {
        let rs = RuleSet::builder().drop_prefix("internal_").build();
        assert!(rs.should_drop(&labels(&[(METRIC_NAME, "internal_debug_counter")])));
        assert!(!rs.should_drop(&labels(&[(METRIC_NAME, "external_counter")])));
    }

    #[test]
    fn per_label_drop_rule() {
        let rs = RuleSet::builder().drop_label_value("env", "test").build();
        assert!(rs.should_drop(&labels(&[("env", "test")])));
        assert!(!rs.should_drop(&labels(&[("env", "prod")])));
    }

    #[test]
    fn rule_manager_publish_is_atomic_and_visible() {
        let manager = RuleManager::default();
        assert!(!manager.should_drop(&labels(&[(METRIC_NAME, "debug_metric")])));
        manager.publish(RuleSet::builder().drop_exact_name("debug_metric").build());
        assert!(manager.should_drop(&labels(&[(METRIC_NAME, "debug_metric")])));
    }

    #[test]
    fn apply_mapping_is_identity_placeholder() {
        let rs = RuleSet::default();
        let ls = labels(&[("a", "b")]);
        assert_eq!(rs.apply_mapping(ls.clone()), ls);
    }
}
