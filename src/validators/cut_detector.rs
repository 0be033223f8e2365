//! Cut / truncation detector: flags a segment
//! whose last sentence ends mid-word, or whose output word count fell
//! below 95% of the input it was generated or stylised from — both signal
//! the model truncated mid-generation and should trigger a stage retry.

const TRUNCATION_RATIO: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationReason {
    MidWordEnding,
    WordCountShortfall,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TruncationFinding {
    pub reason: TruncationReason,
    pub detail: String,
}

/// True if `text`'s last non-whitespace character does not end a sentence
/// (no terminal punctuation) and the text does not end with a closing
/// quote/bracket immediately following one — a cheap proxy for "the model
/// stopped mid-sentence."
fn ends_mid_word(text: &str) -> bool {
    let trimmed = text.trim_end();
    match trimmed.chars().last() {
        None => false,
        Some(last) => {
            const TERMINATORS: &[char] = &['.', '!', '?', '"', '\u{201d}', '\u{2019}', '\'', ')', '\u{2026}'];
            !TERMINATORS.contains(&last)
        }
    }
}

/// Check one segment's stylised/generated text against its input word
/// count. `input_word_count` is the plan's target (stage 6) or the prior
/// stage's output length (stage 8).
pub fn check(text: &str, input_word_count: usize) -> Vec<TruncationFinding> {
    let mut findings = Vec::new();
    if ends_mid_word(text) {
        findings.push(TruncationFinding {
            reason: TruncationReason::MidWordEnding,
            detail: "segment does not end with terminal punctuation".to_string(),
        });
    }
    let output_word_count = text.split_whitespace().count();
    if input_word_count > 0 {
        let ratio = output_word_count as f64 / input_word_count as f64;
        if ratio < TRUNCATION_RATIO {
            findings.push(TruncationFinding {
                reason: TruncationReason::WordCountShortfall,
                detail: format!(
                    "output word count {output_word_count} is {:.1}% of input {input_word_count} (threshold 95%)",
                    ratio * 100.0
                ),
            });
        }
    }
    findings
}

pub fn is_truncated(text: &str, input_word_count: usize) -> bool {
    !check(text, input_word_count).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_sentence_at_full_length_passes() {
        let text = "word ".repeat(100) + "end.";
        assert!(!is_truncated(&text, 100));
    }

    #[test]
    fn mid_word_ending_is_flagged_regardless_of_length() {
        let text = "She walked into the room and said";
        let findings = check(text, 7);
        assert!(findings.iter().any(|f| f.reason == TruncationReason::MidWordEnding));
    }

    #[test]
    fn short_output_below_ninety_five_percent_is_flagged() {
        let text = "one two three four five.";
        let findings = check(text, 100);
        assert!(findings.iter().any(|f| f.reason == TruncationReason::WordCountShortfall));
    }

    #[test]
    fn output_at_exactly_ninety_five_percent_passes() {
        let text = "word ".repeat(95) + "end.";
        assert!(!is_truncated(&text, 100));
    }

    #[test]
    fn zero_input_word_count_skips_ratio_check() {
        let findings = check("end.", 0);
        assert!(findings.iter().all(|f| f.reason != TruncationReason::WordCountShortfall));
    }

    #[test]
    fn trailing_quote_after_terminator_is_not_flagged_as_mid_word() {
        assert!(!ends_mid_word("She said \u{201c}hello.\u{201d}"));
    }
}
