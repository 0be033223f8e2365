//! Cliché / banned-phrase detector. Checked by the Sequential
//! Generator (stage 6, enforced live) and the Editorial Reviewer (stage 9,
//! swept over the final cut).
//!
//! Modeled on `signals/parser.rs`'s regex/heuristic text-signal
//! extraction style, and returns the `Finding`-shaped result
//! (`ClicheViolation`) that `review/findings.rs` uses for its `Severity`
//! result type.

use crate::narraforge_config::PhrasePolicy;
use std::collections::HashMap;

/// One banned-phrase violation found in a piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClicheViolation {
    pub phrase: String,
    pub occurrences: usize,
    pub policy: ViolationPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationPolicy {
    /// The phrase's `never-use` policy was breached — any occurrence.
    NeverUse,
    /// The phrase occurred more than `k` times per `n`-word window.
    OverBudget { k: u32, n: u32 },
}

fn count_occurrences(text: &str, phrase: &str) -> usize {
    let haystack = text.to_lowercase();
    let needle = phrase.to_lowercase();
    if needle.is_empty() {
        return 0;
    }
    haystack.matches(&needle).count()
}

/// Check `text` against the configured banned-phrase table, returning one
/// violation per phrase whose policy is breached.
///
/// `never-use` phrases violate on the first occurrence. `at-most-K-per-
/// N-words` phrases violate when the phrase's occurrence rate, scaled to
/// the text's actual length, exceeds `k` per `n` words.
pub fn check(text: &str, banned_phrases: &HashMap<String, PhrasePolicy>) -> Vec<ClicheViolation> {
    let word_count = text.split_whitespace().count().max(1);
    let mut violations = Vec::new();
    for (phrase, policy) in banned_phrases {
        let occurrences = count_occurrences(text, phrase);
        if occurrences == 0 {
            continue;
        }
        match policy {
            PhrasePolicy::NeverUse => {
                violations.push(ClicheViolation { phrase: phrase.clone(), occurrences, policy: ViolationPolicy::NeverUse });
            }
            PhrasePolicy::AtMostKPerNWords { k, n } => {
                let allowed = (*k as f64) * (word_count as f64) / (*n as f64);
                if (occurrences as f64) > allowed.max(*k as f64) {
                    violations.push(ClicheViolation {
                        phrase: phrase.clone(),
                        occurrences,
                        policy: ViolationPolicy::OverBudget { k: *k, n: *n },
                    });
                }
            }
        }
    }
    violations.sort_by(|a, b| a.phrase.cmp(&b.phrase));
    violations
}
