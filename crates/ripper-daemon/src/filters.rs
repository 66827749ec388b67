//! User-supplied match phrases.
//!
//! The filter text is one phrase per line.  A track "matches" when its
//! display string contains any phrase, ignoring case.

/// Ordered list of non-empty, trimmed phrases.  Duplicates are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    phrases: Vec<String>,
    /// Lower-cased copies of `phrases`, same order.
    needles: Vec<String>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_text(raw: &str) -> Self {
        let mut set = Self::new();
        set.rebuild(raw);
        set
    }

    /// Replace all phrases with the lines of `raw`.  Blank lines are dropped.
    pub fn rebuild(&mut self, raw: &str) {
        self.phrases = raw
            .split(['\r', '\n'])
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        self.needles = self.phrases.iter().map(|p| p.to_lowercase()).collect();
    }

    pub fn matches(&self, text: &str) -> bool {
        if self.needles.is_empty() {
            return false;
        }
        let haystack = text.to_lowercase();
        self.needles.iter().any(|needle| haystack.contains(needle.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }
}
