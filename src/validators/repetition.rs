//! Repetition detector: flags connective/comparison words that
//! occur more often than their configured per-1000-word budget.
//!
//! Modeled on `signals/parser.rs`'s frequency-counting style.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct RepetitionViolation {
    pub word: String,
    pub occurrences: usize,
    pub rate_per_1000: f64,
    pub budget_per_1000: u32,
}

fn word_occurrences(text: &str, word: &str) -> usize {
    let target = word.to_lowercase();
    text.split_whitespace()
        .filter(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase() == target)
        .count()
}

/// Check `text` against `repetition_budgets` (word -> max occurrences per
/// 1000 words), returning one violation per word whose observed rate
/// exceeds its budget.
pub fn check(text: &str, repetition_budgets: &HashMap<String, u32>) -> Vec<RepetitionViolation> {
    let total_words = text.split_whitespace().count().max(1);
    let mut violations = Vec::new();
    for (word, budget) in repetition_budgets {
        let occurrences = word_occurrences(text, word);
        if occurrences == 0 {
            continue;
        }
        let rate_per_1000 = (occurrences as f64) * 1000.0 / (total_words as f64);
        if rate_per_1000 > *budget as f64 {
            violations.push(RepetitionViolation { word: word.clone(), occurrences, rate_per_1000, budget_per_1000: *budget });
        }
    }
    violations.sort_by(|a, b| a.word.cmp(&b.word));
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budgets(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn word_under_budget_is_not_flagged() {
        let text = format!("suddenly {}", "word ".repeat(2000));
        let violations = check(&text, &budgets(&[("suddenly", 5)]));
        assert!(violations.is_empty());
    }

    #[test]
    fn word_over_budget_in_short_text_is_flagged() {
        let text = "suddenly suddenly suddenly the door opened suddenly";
        let violations = check(text, &budgets(&[("suddenly", 1)]));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].occurrences, 4);
    }

    #[test]
    fn matching_ignores_surrounding_punctuation_and_case() {
        let text = "Suddenly, she turned. Suddenly!";
        let violations = check(text, &budgets(&[("suddenly", 1)]));
        assert_eq!(violations[0].occurrences, 2);
    }

    #[test]
    fn word_absent_from_text_produces_no_violation() {
        let violations = check("a calm and quiet afternoon", &budgets(&[("suddenly", 1)]));
        assert!(violations.is_empty());
    }
}
