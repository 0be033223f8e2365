//! Coherence scorer: an additive-penalty composite
//! over the four sub-scores the Coherence Validator agent reports, gated by
//! a configurable minimum.
//!
//! Modeled on `review/findings.rs`'s `Finding`/`Severity`
//! result shape — here specialised to the fixed `CoherenceIssue` payload
//! already defined in `narraforge-common`.

use narraforge_common::{CoherenceIssue, CoherenceReport, IssueSeverity};

/// Recompute the composite score from the sub-scores and issue list:
/// average the four sub-scores, then subtract each issue's severity
/// penalty, clamped to [0, 1]. The four sub-scores themselves are reported
/// by the agent and not re-derived here — this only folds in the issue
/// penalties.
pub fn composite_score(logical: f64, psychological: f64, temporal: f64, world_rule: f64, issues: &[CoherenceIssue]) -> f64 {
    let base = (logical + psychological + temporal + world_rule) / 4.0;
    let penalty: f64 = issues.iter().map(|issue| issue.severity.penalty()).sum();
    (base - penalty).clamp(0.0, 1.0)
}

/// Build a `CoherenceReport` with `composite` computed per the additive
/// rule, ready for the agent to return.
pub fn build_report(logical: f64, psychological: f64, temporal: f64, world_rule: f64, issues: Vec<CoherenceIssue>) -> CoherenceReport {
    let composite = composite_score(logical, psychological, temporal, world_rule, &issues);
    CoherenceReport { logical, psychological, temporal, world_rule, composite, issues }
}

/// Whether a report clears the configured threshold (default 0.85, spec
/// §6). Stage 7 is retried with a tier upgrade when this is `false`.
pub fn passes_threshold(report: &CoherenceReport, min_coherence_score: f64) -> bool {
    report.composite >= min_coherence_score
}

/// Highest-severity issue in a report, used for log messages and for
/// surfacing in `StageError`'s `last_cause`.
pub fn worst_issue(report: &CoherenceReport) -> Option<&CoherenceIssue> {
    report
        .issues
        .iter()
        .max_by(|a, b| a.severity.penalty().partial_cmp(&b.severity.penalty()).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(severity: IssueSeverity) -> CoherenceIssue {
        CoherenceIssue { severity, segment_index: Some(0), description: "test issue".into() }
    }

    #[test]
    fn perfect_subscores_with_no_issues_score_one() {
        assert_eq!(composite_score(1.0, 1.0, 1.0, 1.0, &[]), 1.0);
    }

    #[test]
    fn each_critical_issue_subtracts_point_fifteen() {
        let score = composite_score(1.0, 1.0, 1.0, 1.0, &[issue(IssueSeverity::Critical)]);
        assert!((score - 0.85).abs() < 1e-9);
    }

    #[test]
    fn score_clamps_at_zero_never_goes_negative() {
        let issues: Vec<_> = (0..10).map(|_| issue(IssueSeverity::Critical)).collect();
        assert_eq!(composite_score(1.0, 1.0, 1.0, 1.0, &issues), 0.0);
    }

    #[test]
    fn default_threshold_of_zero_eight_five_gates_correctly() {
        let report = build_report(0.9, 0.9, 0.9, 0.9, vec![issue(IssueSeverity::Major)]);
        assert!((report.composite - 0.82).abs() < 1e-9);
        assert!(!passes_threshold(&report, 0.85));
        assert!(passes_threshold(&report, 0.80));
    }

    #[test]
    fn min_coherence_score_of_one_always_fails_with_any_blemish() {
        let report = build_report(1.0, 1.0, 1.0, 1.0, vec![issue(IssueSeverity::Warning)]);
        assert!(!passes_threshold(&report, 1.0));
    }

    #[test]
    fn worst_issue_picks_highest_penalty() {
        let report = build_report(1.0, 1.0, 1.0, 1.0, vec![issue(IssueSeverity::Minor), issue(IssueSeverity::Critical)]);
        assert_eq!(worst_issue(&report).unwrap().severity, IssueSeverity::Critical);
    }
}
