//! Escalation evaluation
//!
//! Classifies a user message and a responder's output into an
//! [`EscalationLevel`]. Within one conversation the level only ever rises:
//! the new level is `max(current, detected)`.

use crate::rules::{RuleError, RuleSet, RuleSpec};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Ordered severity of a conversation
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationLevel {
    #[default]
    None,
    Routine,
    DoctorRequired,
    Emergency,
}

impl EscalationLevel {
    /// Levels at which a human must take over the conversation
    pub fn requires_human(self) -> bool {
        self >= EscalationLevel::DoctorRequired
    }

    /// `None` maps to an absent level on the wire
    pub fn as_option(self) -> Option<Self> {
        match self {
            EscalationLevel::None => None,
            level => Some(level),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EscalationLevel::None => "NONE",
            EscalationLevel::Routine => "ROUTINE",
            EscalationLevel::DoctorRequired => "DOCTOR_REQUIRED",
            EscalationLevel::Emergency => "EMERGENCY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Some(EscalationLevel::None),
            "ROUTINE" => Some(EscalationLevel::Routine),
            "DOCTOR_REQUIRED" | "DOCTOR" => Some(EscalationLevel::DoctorRequired),
            "EMERGENCY" => Some(EscalationLevel::Emergency),
            _ => None,
        }
    }
}

impl fmt::Display for EscalationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monotonic escalation transition
pub fn escalate(current: EscalationLevel, detected: EscalationLevel) -> EscalationLevel {
    current.max(detected)
}

/// Marker a responder places in its output to force escalation
pub const ESCALATION_MARKER: &str = "[[ESCALATE]]";

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[ \t]*\[\[ESCALATE(?::\s*([A-Z_]+)\s*)?\]\]").expect("valid marker regex")
});

// "pain level 9", "dolor 7", "pain, level 9 of 10"
static SEVERITY_AFTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:pain|dolor|douleur|dor)\b[^\d\n.!?]{0,40}?\b(\d{1,2})\b")
        .expect("valid severity regex")
});

// "9/10", "8 out of 10", "7 de 10"
static SEVERITY_SCALE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})\s*(?:/|out of|de|sur)\s*10\b").expect("valid scale regex")
});

/// Remove escalation markers from responder output.
///
/// Returns the cleaned text and the highest level any marker requested. Text
/// without a marker is returned unchanged.
pub fn strip_markers(text: &str) -> (String, Option<EscalationLevel>) {
    let mut requested: Option<EscalationLevel> = None;
    for caps in MARKER_RE.captures_iter(text) {
        let level = caps
            .get(1)
            .and_then(|m| EscalationLevel::parse(m.as_str()))
            .unwrap_or(EscalationLevel::DoctorRequired);
        requested = Some(requested.map_or(level, |r| r.max(level)));
    }

    match requested {
        Some(level) => {
            let cleaned = MARKER_RE.replace_all(text, "");
            (cleaned.trim().to_string(), Some(level))
        }
        None => (text.to_string(), None),
    }
}

/// Map a 0-10 severity score onto an escalation level
pub fn level_for_severity(score: u32) -> EscalationLevel {
    match score {
        8..=10 => EscalationLevel::Emergency,
        5..=7 => EscalationLevel::DoctorRequired,
        _ => EscalationLevel::None,
    }
}

/// Highest 0-10 severity score mentioned in the text, if any
pub fn extract_severity(text: &str) -> Option<u32> {
    SEVERITY_AFTER_RE
        .captures_iter(text)
        .chain(SEVERITY_SCALE_RE.captures_iter(text))
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u32>().ok())
        .filter(|score| *score <= 10)
        .max()
}

/// Result of evaluating one user/responder exchange
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub level: EscalationLevel,
    /// Responder output with markers removed
    pub text: String,
    pub marker_found: bool,
}

/// Keyword and severity based escalation classifier
#[derive(Debug, Clone)]
pub struct EscalationEvaluator {
    keywords: RuleSet<EscalationLevel>,
}

impl EscalationEvaluator {
    pub fn new(rules: &[RuleSpec<EscalationLevel>]) -> Result<Self, RuleError> {
        Ok(Self {
            keywords: RuleSet::compile(rules)?,
        })
    }

    /// Evaluator with an extra, role-specific rule table layered on top
    pub fn with_extra(&self, extra: &[RuleSpec<EscalationLevel>]) -> Result<Self, RuleError> {
        if extra.is_empty() {
            return Ok(self.clone());
        }
        // Every matching rule counts and the max wins, so order does not matter here
        let mut specs: Vec<RuleSpec<EscalationLevel>> = self
            .keywords
            .iter()
            .map(|rule| RuleSpec::new(rule.pattern(), rule.outcome))
            .collect();
        specs.extend_from_slice(extra);
        Self::new(&specs)
    }

    /// Level detected in a single piece of text
    pub fn detect(&self, text: &str) -> EscalationLevel {
        let keyword = self
            .keywords
            .matches(text)
            .copied()
            .max()
            .unwrap_or_default();
        let severity = extract_severity(text).map_or(EscalationLevel::None, level_for_severity);
        keyword.max(severity)
    }

    /// Evaluate the latest user text together with the responder's output.
    ///
    /// Markers in the output are honoured and stripped. Keywords in the
    /// responder's own text are not scanned, since a reply that merely
    /// mentions "chest pain" is not itself an emergency.
    pub fn evaluate_exchange(&self, user_text: &str, response: &str) -> Evaluation {
        let (text, marker) = strip_markers(response);
        let level = self
            .detect(user_text)
            .max(marker.unwrap_or(EscalationLevel::None));
        Evaluation {
            level,
            text,
            marker_found: marker.is_some(),
        }
    }
}

/// Built-in keyword rules (English and Spanish)
pub fn default_rules() -> Vec<RuleSpec<EscalationLevel>> {
    vec![
        RuleSpec::new(
            r"\b(chest pain|can'?t breathe|cannot breathe|difficulty breathing|unconscious|passed out|stroke|heart attack|severe bleeding|suicid\w*|overdose|seizure|anaphyla\w*)\b",
            EscalationLevel::Emergency,
        ),
        RuleSpec::new(
            r"\b(dolor (?:de|en el) pecho|no puedo respirar|inconsciente|desmay\w+|derrame cerebral|infarto|sangrado (?:abundante|severo)|suicid\w*|sobredosis|convulsi\w+)\b",
            EscalationLevel::Emergency,
        ),
        RuleSpec::new(
            r"\b(high fever|fever|vomiting|infection|swelling|bleeding|fracture|broken bone|severe|worsening)\b",
            EscalationLevel::DoctorRequired,
        ),
        RuleSpec::new(
            r"\b(fiebre|v[oó]mito\w*|infecci[oó]n|hinchaz[oó]n|sangrado|fractura|grave|empeora\w*)\b",
            EscalationLevel::DoctorRequired,
        ),
        RuleSpec::new(
            r"\b(pain|hurts?|aches?|symptoms?|rash|cough|prescription|refill|medication)\b",
            EscalationLevel::Routine,
        ),
        RuleSpec::new(
            r"\b(dolor|duele|s[ií]ntomas?|tos|receta|medicamento\w*|sarpullido)\b",
            EscalationLevel::Routine,
        ),
    ]
}

impl Default for EscalationEvaluator {
    fn default() -> Self {
        Self {
            keywords: RuleSet::compile(&default_rules()).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_severe_pain_level_nine_is_emergency() {
        let evaluator = EscalationEvaluator::default();
        let level = evaluator.detect("I have severe pain, level 9");
        assert_eq!(level, EscalationLevel::Emergency);
        assert!(level.requires_human());
    }

    #[test]
    fn test_severity_boundaries() {
        assert_eq!(level_for_severity(10), EscalationLevel::Emergency);
        assert_eq!(level_for_severity(8), EscalationLevel::Emergency);
        assert_eq!(level_for_severity(7), EscalationLevel::DoctorRequired);
        assert_eq!(level_for_severity(5), EscalationLevel::DoctorRequired);
        assert_eq!(level_for_severity(4), EscalationLevel::None);
    }

    #[test]
    fn test_extract_severity_forms() {
        assert_eq!(extract_severity("my pain is about 6"), Some(6));
        assert_eq!(extract_severity("it's 8/10 today"), Some(8));
        assert_eq!(extract_severity("tengo dolor nivel 7 de 10"), Some(7));
        assert_eq!(extract_severity("pain 3, earlier it was 9 out of 10"), Some(9));
        assert_eq!(extract_severity("I need 2 appointments"), None);
        assert_eq!(extract_severity("pain level 45"), None);
    }

    #[test]
    fn test_spanish_keywords() {
        let evaluator = EscalationEvaluator::default();
        assert_eq!(
            evaluator.detect("Tengo DOLOR EN EL PECHO"),
            EscalationLevel::Emergency
        );
        assert_eq!(
            evaluator.detect("mi hijo tiene fiebre"),
            EscalationLevel::DoctorRequired
        );
        assert_eq!(
            evaluator.detect("necesito una receta"),
            EscalationLevel::Routine
        );
    }

    #[test]
    fn test_neutral_text_is_none() {
        let evaluator = EscalationEvaluator::default();
        assert_eq!(
            evaluator.detect("Can I book a cleaning next Tuesday?"),
            EscalationLevel::None
        );
    }

    #[test]
    fn test_strip_marker_defaults_to_doctor_required() {
        let (text, level) = strip_markers("Please see a doctor today. [[ESCALATE]]");
        assert_eq!(text, "Please see a doctor today.");
        assert_eq!(level, Some(EscalationLevel::DoctorRequired));
    }

    #[test]
    fn test_strip_marker_with_level() {
        let (text, level) = strip_markers("[[escalate:emergency]] Call emergency services now.");
        assert_eq!(text, "Call emergency services now.");
        assert_eq!(level, Some(EscalationLevel::Emergency));
    }

    #[test]
    fn test_text_without_marker_is_untouched() {
        let original = "  Your invoice is paid.\n";
        let (text, level) = strip_markers(original);
        assert_eq!(text, original);
        assert_eq!(level, None);
    }

    #[test]
    fn test_evaluate_exchange_combines_user_text_and_marker() {
        let evaluator = EscalationEvaluator::default();
        let eval = evaluator.evaluate_exchange("my tooth hurts", "I'll flag this. [[ESCALATE]]");
        assert_eq!(eval.level, EscalationLevel::DoctorRequired);
        assert_eq!(eval.text, "I'll flag this.");
        assert!(eval.marker_found);
    }

    #[test]
    fn test_responder_keywords_do_not_escalate() {
        let evaluator = EscalationEvaluator::default();
        let eval = evaluator.evaluate_exchange(
            "what are your opening hours?",
            "We're open 9-5. If you ever have chest pain, call emergency services.",
        );
        assert_eq!(eval.level, EscalationLevel::None);
    }

    #[test]
    fn test_extra_rules_are_layered() {
        let base = EscalationEvaluator::default();
        let dental = base
            .with_extra(&[RuleSpec::new(r"\bknocked out tooth\b", EscalationLevel::Emergency)])
            .unwrap();
        assert_eq!(dental.detect("a knocked out tooth"), EscalationLevel::Emergency);
        assert_eq!(dental.detect("I have a fever"), EscalationLevel::DoctorRequired);
    }

    fn arb_level() -> impl Strategy<Value = EscalationLevel> {
        prop_oneof![
            Just(EscalationLevel::None),
            Just(EscalationLevel::Routine),
            Just(EscalationLevel::DoctorRequired),
            Just(EscalationLevel::Emergency),
        ]
    }

    proptest! {
        #[test]
        fn prop_escalation_never_decreases(
            detections in proptest::collection::vec(arb_level(), 0..30)
        ) {
            let mut current = EscalationLevel::None;
            let mut requires_human = false;
            for detected in detections {
                let next = escalate(current, detected);
                prop_assert!(next >= current);
                prop_assert!(next >= detected);
                let was_human = requires_human;
                requires_human |= next.requires_human();
                prop_assert!(!was_human || requires_human);
                current = next;
            }
        }
    }
}
