//! Pattern detection and running statistics

use crate::rules::{RuleError, RuleSet, RuleSpec};

/// Incremental running mean.
///
/// Returns the new `(count, rate)` after folding in `observed`.
pub fn running_mean(count: u64, rate: f64, observed: f64) -> (u64, f64) {
    let next = count + 1;
    #[allow(clippy::cast_precision_loss)]
    let rate = (rate * count as f64 + observed) / next as f64;
    (next, rate)
}

/// Named text detectors whose matches feed `PatternStat`s
#[derive(Debug, Clone, Default)]
pub struct PatternDetector {
    rules: RuleSet<String>,
}

impl PatternDetector {
    pub fn new(specs: &[RuleSpec<String>]) -> Result<Self, RuleError> {
        Ok(Self {
            rules: RuleSet::compile(specs)?,
        })
    }

    /// Names of every pattern matching `text`, deduplicated, in rule order
    pub fn detect(&self, text: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for name in self.rules.matches(text) {
            if !found.contains(name) {
                found.push(name.clone());
            }
        }
        found
    }
}

/// Built-in detectors
pub fn default_detectors() -> Vec<RuleSpec<String>> {
    [
        (
            r"\b(appointment|book|booking|schedule|reschedule|cita|agendar|reservar)\b",
            "appointment_request",
        ),
        (r"\b(cancel|cancell?ation|cancelar)\b", "cancellation"),
        (
            r"\b(invoice|bill|billing|charge|payment|factura|pago|cobro)\b",
            "billing_question",
        ),
        (
            r"\b(insurance|copay|coverage|financing|payment plan|seguro|financiamiento)\b",
            "financial_question",
        ),
        (
            r"\b(pain|ache|swelling|bleeding|fever|dolor|hinchaz[oó]n|sangrado|fiebre)\b",
            "symptom_report",
        ),
        (
            r"\b(prescription|medication|medicine|dose|receta|medicamento)\b",
            "medication_question",
        ),
        (
            r"\b(hours|open|address|parking|location|horario|direcci[oó]n)\b",
            "clinic_information",
        ),
    ]
    .into_iter()
    .map(|(pattern, name)| RuleSpec::new(pattern, name.to_string()))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_running_mean_basic() {
        let (count, rate) = running_mean(0, 0.0, 1.0);
        assert_eq!(count, 1);
        assert!((rate - 1.0).abs() < 1e-12);

        let (count, rate) = running_mean(count, rate, 0.0);
        assert_eq!(count, 2);
        assert!((rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_detects_spanish_and_english() {
        let detector = PatternDetector::new(&default_detectors()).unwrap();
        assert_eq!(
            detector.detect("Quiero agendar una cita"),
            vec!["appointment_request".to_string()]
        );
        let found = detector.detect("Cancel my appointment, the pain is gone");
        assert!(found.contains(&"cancellation".to_string()));
        assert!(found.contains(&"appointment_request".to_string()));
        assert!(found.contains(&"symptom_report".to_string()));
        assert!(detector.detect("hello there").is_empty());
    }

    #[test]
    fn test_duplicate_names_reported_once() {
        let detector = PatternDetector::new(&[
            RuleSpec::new("tooth", "dental".to_string()),
            RuleSpec::new("teeth", "dental".to_string()),
        ])
        .unwrap();
        assert_eq!(detector.detect("tooth and teeth"), vec!["dental".to_string()]);
    }

    proptest! {
        #[test]
        fn prop_running_mean_equals_fraction(outcomes in proptest::collection::vec(any::<bool>(), 1..200)) {
            let mut count = 0;
            let mut rate = 0.0;
            for success in &outcomes {
                (count, rate) = running_mean(count, rate, if *success { 1.0 } else { 0.0 });
            }
            let k = outcomes.iter().filter(|s| **s).count() as f64;
            let n = outcomes.len() as f64;
            prop_assert_eq!(count, outcomes.len() as u64);
            prop_assert!((rate - k / n).abs() < 1e-9);
        }

        #[test]
        fn prop_running_mean_is_order_independent(
            mut outcomes in proptest::collection::vec(any::<bool>(), 1..100)
        ) {
            let fold = |items: &[bool]| {
                items.iter().fold((0u64, 0.0f64), |(c, r), s| running_mean(c, r, if *s { 1.0 } else { 0.0 }))
            };
            let (_, forward) = fold(&outcomes);
            outcomes.reverse();
            let (_, backward) = fold(&outcomes);
            prop_assert!((forward - backward).abs() < 1e-9);
        }
    }
}
