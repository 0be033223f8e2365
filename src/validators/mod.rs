//! Validators and text health: plain, synchronous,
//! dependency-light checks invoked inline by stages 6 through 9. No model
//! calls — these are deterministic functions over already-generated text.

pub mod cliche;
pub mod coherence;
pub mod cut_detector;
pub mod encoding;
pub mod repetition;

pub use cliche::{check as check_cliche, ClicheViolation, ViolationPolicy};
pub use coherence::{build_report as build_coherence_report, composite_score, passes_threshold, worst_issue};
pub use cut_detector::{check as check_truncation, is_truncated, TruncationFinding, TruncationReason};
pub use encoding::{clean as clean_encoding, is_clean as is_encoding_clean};
pub use repetition::{check as check_repetition, RepetitionViolation};
