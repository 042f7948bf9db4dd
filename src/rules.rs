//! Ordered `{pattern, outcome}` classification rules
//!
//! Routing, escalation keywords and pattern detectors are all rule tables of
//! this shape, so they can be loaded from configuration and tested on their own.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Invalid rule pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Serialized form of a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec<T> {
    pub pattern: String,
    pub outcome: T,
}

impl<T> RuleSpec<T> {
    pub fn new(pattern: impl Into<String>, outcome: T) -> Self {
        Self {
            pattern: pattern.into(),
            outcome,
        }
    }
}

/// A compiled rule. Patterns always match case-insensitively.
#[derive(Debug, Clone)]
pub struct Rule<T> {
    regex: Regex,
    pub outcome: T,
}

impl<T> Rule<T> {
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }
}

/// Rules evaluated in declaration order
#[derive(Debug, Clone)]
pub struct RuleSet<T> {
    rules: Vec<Rule<T>>,
}

impl<T: Clone> RuleSet<T> {
    pub fn compile(specs: &[RuleSpec<T>]) -> Result<Self, RuleError> {
        let rules = specs
            .iter()
            .map(|spec| {
                let regex = RegexBuilder::new(&spec.pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| RuleError::InvalidPattern {
                        pattern: spec.pattern.clone(),
                        source,
                    })?;
                Ok(Rule {
                    regex,
                    outcome: spec.outcome.clone(),
                })
            })
            .collect::<Result<Vec<_>, RuleError>>()?;
        Ok(Self { rules })
    }

    /// Outcome of the first rule that matches
    pub fn first_match(&self, text: &str) -> Option<&T> {
        self.rules
            .iter()
            .find(|rule| rule.is_match(text))
            .map(|rule| &rule.outcome)
    }

    /// Outcomes of every matching rule, in rule order
    pub fn matches<'a>(&'a self, text: &'a str) -> impl Iterator<Item = &'a T> + 'a {
        self.rules
            .iter()
            .filter(move |rule| rule.is_match(text))
            .map(|rule| &rule.outcome)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule<T>> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<T> Default for RuleSet<T> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn colours() -> RuleSet<&'static str> {
        RuleSet::compile(&[
            RuleSpec::new(r"\b(red|rojo)\b", "warm"),
            RuleSpec::new(r"\b(blue|azul)\b", "cool"),
            RuleSpec::new(r"\b(orange|red)\b", "citrus"),
        ])
        .unwrap()
    }

    #[test]
    fn test_first_match_respects_order() {
        let rules = colours();
        assert_eq!(rules.first_match("A RED car"), Some(&"warm"));
        assert_eq!(rules.first_match("el cielo azul"), Some(&"cool"));
        assert_eq!(rules.first_match("green"), None);
    }

    #[test]
    fn test_matches_returns_all_hits() {
        let rules = colours();
        let hits: Vec<_> = rules.matches("red and blue").copied().collect();
        assert_eq!(hits, vec!["warm", "cool", "citrus"]);
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let err = RuleSet::compile(&[RuleSpec::new("(unclosed", 1)]).unwrap_err();
        assert!(err.to_string().contains("(unclosed"));
    }
}
