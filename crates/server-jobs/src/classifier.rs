// crates/server-jobs/src/classifier.rs
//! Coarse progress inference from pipeline output.
//!
//! The pipeline prints free-form status lines. A small ordered table of
//! substring triggers maps a line to a percentage; the first matching rule
//! wins and lines with no match leave progress unchanged.

/// One `trigger -> value` entry of the classifier table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressRule {
    pub trigger: &'static str,
    pub value: u8,
}

impl ProgressRule {
    pub const fn new(trigger: &'static str, value: u8) -> Self {
        Self { trigger, value }
    }
}

/// Stage markers printed by the video pipeline, in priority order.
pub const DEFAULT_RULES: &[ProgressRule] = &[
    ProgressRule::new("Processing", 30),
    ProgressRule::new("Downloading", 50),
    ProgressRule::new("Segmenting", 70),
    ProgressRule::new("Completed", 90),
    ProgressRule::new("Success", 90),
];

#[derive(Debug, Clone)]
pub struct ProgressClassifier {
    rules: Vec<ProgressRule>,
}

impl ProgressClassifier {
    pub fn new(rules: impl Into<Vec<ProgressRule>>) -> Self {
        Self {
            rules: rules.into(),
        }
    }

    /// Progress value suggested by `line`, if any rule matches.
    pub fn classify(&self, line: &str) -> Option<u8> {
        self.rules
            .iter()
            .find(|rule| line.contains(rule.trigger))
            .map(|rule| rule.value.min(100))
    }

    pub fn rules(&self) -> &[ProgressRule] {
        &self.rules
    }
}

impl Default for ProgressClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_RULES)
    }
}
