//! Roll numbers: `{class}-{major}-{seq}` with a zero-padded sequence per cohort.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum width of the sequence suffix. Wider sequences are written in full.
const SEQUENCE_WIDTH: usize = 3;

/// Human-readable student identifier, unique across the catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RollNumber(String);

impl RollNumber {
    /// Prefix shared by every roll number of a (class, major) cohort, trailing dash included.
    pub fn cohort_prefix(class_label: &str, major: &str) -> String {
        format!("{class_label}-{major}-")
    }

    pub fn compose(class_label: &str, major: &str, sequence: u32) -> Self {
        Self(format!(
            "{}{sequence:0width$}",
            Self::cohort_prefix(class_label, major),
            width = SEQUENCE_WIDTH
        ))
    }

    /// Wraps a stored roll number without re-validating it.
    pub fn from_stored(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric suffix when this roll number belongs to the cohort `prefix`.
    ///
    /// The remainder after the prefix must be all digits, so a cohort whose
    /// major happens to extend another cohort's prefix is not mistaken for it.
    pub fn sequence_in(&self, prefix: &str) -> Option<u32> {
        let rest = self.0.strip_prefix(prefix)?;
        if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        rest.parse().ok()
    }
}

impl fmt::Display for RollNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Highest sequence among `existing` roll numbers of the cohort.
///
/// Numeric, not lexicographic: `X-A-1000` sorts before `X-A-999` as text.
pub fn max_sequence<'a, I>(existing: I, prefix: &str) -> Option<u32>
where
    I: IntoIterator<Item = &'a RollNumber>,
{
    existing
        .into_iter()
        .filter_map(|r| r.sequence_in(prefix))
        .max()
}

/// Sequence following `current_max`; a fresh cohort starts at 1.
pub fn next_sequence(current_max: Option<u32>) -> u32 {
    current_max.map_or(1, |m| m.saturating_add(1))
}

/// Roll number the next member of the (class, major) cohort receives, given every existing one.
pub fn next_roll_number<'a, I>(class_label: &str, major: &str, existing: I) -> RollNumber
where
    I: IntoIterator<Item = &'a RollNumber>,
{
    let prefix = RollNumber::cohort_prefix(class_label, major);
    RollNumber::compose(class_label, major, next_sequence(max_sequence(existing, &prefix)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rn(s: &str) -> RollNumber {
        RollNumber::from_stored(s.to_string())
    }

    #[test]
    fn test_compose_pads_to_three_digits() {
        assert_eq!(RollNumber::compose("X", "SIJA1", 1).as_str(), "X-SIJA1-001");
        assert_eq!(RollNumber::compose("XI", "DKV2", 15).as_str(), "XI-DKV2-015");
    }

    #[test]
    fn test_compose_widens_past_999() {
        assert_eq!(RollNumber::compose("X", "SIJA1", 999).as_str(), "X-SIJA1-999");
        assert_eq!(RollNumber::compose("X", "SIJA1", 1000).as_str(), "X-SIJA1-1000");
    }

    #[test]
    fn test_sequence_in_cohort() {
        let prefix = RollNumber::cohort_prefix("X", "SIJA1");
        assert_eq!(rn("X-SIJA1-007").sequence_in(&prefix), Some(7));
        assert_eq!(rn("X-SIJA2-007").sequence_in(&prefix), None);
        assert_eq!(rn("X-SIJA1-").sequence_in(&prefix), None);
        // Looks like cohort "X"/"SIJA1" but is cohort "X"/"SIJA1-B".
        assert_eq!(rn("X-SIJA1-B-001").sequence_in(&prefix), None);
    }

    #[test]
    fn test_max_sequence_is_numeric() {
        let prefix = RollNumber::cohort_prefix("X", "A");
        let existing = vec![rn("X-A-999"), rn("X-A-1000"), rn("X-A-010"), rn("XI-A-5000")];
        assert_eq!(max_sequence(&existing, &prefix), Some(1000));
        assert_eq!(next_sequence(max_sequence(&existing, &prefix)), 1001);
    }

    #[test]
    fn test_fresh_cohort_starts_at_one() {
        let prefix = RollNumber::cohort_prefix("X", "SIJA1");
        assert_eq!(max_sequence(&Vec::<RollNumber>::new(), &prefix), None);
        assert_eq!(next_sequence(None), 1);
    }
}
