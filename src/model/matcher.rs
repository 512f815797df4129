use regex::Regex;

use crate::error::{Error, Result};

/// The four matcher kinds a PromQL label matcher can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Equal,
    NotEqual,
    RegexMatch,
    RegexNoMatch,
}

/// `(kind, label_name, pattern)`. Regex matchers are anchored to a full-string
/// match; the regex is compiled lazily by [`Matcher::compile`] since most
/// matchers in a query are plain equality and never need it.
#[derive(Debug, Clone)]
pub struct Matcher {
    pub kind: MatchKind,
    pub name: String,
    pub pattern: String,
    compiled: Option<Regex>,
}

impl Matcher {
    pub fn new(kind: MatchKind, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self { kind, name: name.into(), pattern: pattern.into(), compiled: None }
    }

    pub fn equal(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(MatchKind::Equal, name, pattern)
    }

    /// Compiles the regex, if this is a regex matcher. Anchors the pattern so
    /// that `.match()` semantics are full-string, not `find`.
    pub fn compile(&mut self) -> Result<()> {
        if self.compiled.is_some() {
            return Ok(());
        }
        if matches!(self.kind, MatchKind::RegexMatch | MatchKind::RegexNoMatch) {
            let anchored = format!("^(?:{})$", self.pattern);
            let re = Regex::new(&anchored)
                .map_err(|e| Error::semantic(format!("invalid regex in matcher: {e}")))?;
            self.compiled = Some(re);
        }
        Ok(())
    }

    /// Evaluate this matcher against a label value. `value` is `None` when the
    /// label is absent from the series entirely (treated as the empty string
    /// for matching purposes, per the spec's `EQUAL`/`NOT_EQUAL` edge cases).
    pub fn matches(&self, value: Option<&str>) -> bool {
        let value = value.unwrap_or("");
        match self.kind {
            MatchKind::Equal => value == self.pattern,
            MatchKind::NotEqual => value != self.pattern,
            MatchKind::RegexMatch => self
                .compiled
                .as_ref()
                .map(|re| re.is_match(value))
                .unwrap_or(false),
            MatchKind::RegexNoMatch => self
                .compiled
                .as_ref()
                .map(|re| !re.is_match(value))
                .unwrap_or(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_empty_pattern_means_absent_or_empty() {
        let m = Matcher::equal("job", "");
        assert!(m.matches(None));
        assert!(m.matches(Some("")));
        assert!(!m.matches(Some("api")));
    }

    #[test]
    fn not_equal_empty_pattern_means_present_and_nonempty() {
        let m = Matcher::new(MatchKind::NotEqual, "job", "");
        assert!(!m.matches(None));
        assert!(!m.matches(Some("")));
        assert!(m.matches(Some("api")));
    }

    #[test]
    fn regex_match_is_anchored_full_string() {
        let mut m = Matcher::new(MatchKind::RegexMatch, "job", "ap.");
        m.compile().unwrap();
        assert!(m.matches(Some("api")));
        assert!(!m.matches(Some("apix")));
        assert!(!m.matches(Some("xapi")));
    }

    #[test]
    fn regex_no_match_inverts_and_defaults_true_when_uncompiled() {
        let m = Matcher::new(MatchKind::RegexNoMatch, "job", "ap.");
        // uncompiled regex matcher: matches() falls back to true for NEQ regex
        assert!(m.matches(Some("api")));
    }
}
