use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A timed write-block over a glob-matched sub-tree. Matching is
/// `glob-match`'s standard semantics: a single `*` matches within one
/// `/`-separated segment, `**` crosses segment boundaries. A pattern
/// meant to cover every device/point under a building or campus (not
/// just its immediate children) must use `**`, not `*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverridePattern {
    pub glob: String,
    /// `None` means the override never expires on its own.
    pub end_time: Option<DateTime<Utc>>,
    pub staggered_revert: bool,
}

impl OverridePattern {
    pub fn new(glob: impl Into<String>, end_time: Option<DateTime<Utc>>, staggered_revert: bool) -> Self {
        Self {
            glob: glob.into(),
            end_time,
            staggered_revert,
        }
    }

    pub fn matches(&self, identifier: &str) -> bool {
        glob_match::glob_match(&self.glob, identifier)
    }

    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.end_time.is_some_and(|end| end <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn single_star_matches_only_immediate_children() {
        let pattern = OverridePattern::new("devices/building1/*", None, false);
        assert!(pattern.matches("devices/building1/device1"));
        assert!(!pattern.matches("devices/building1/device1/temp"));
        assert!(!pattern.matches("devices/building2/device1"));
    }

    #[test]
    fn double_star_matches_the_whole_subtree() {
        let pattern = OverridePattern::new("devices/building1/**", None, false);
        assert!(pattern.matches("devices/building1/device1"));
        assert!(pattern.matches("devices/building1/device1/temp"));
        assert!(!pattern.matches("devices/building2/device1"));
    }

    #[test]
    fn no_end_time_never_expires() {
        let pattern = OverridePattern::new("devices/*", None, false);
        assert!(!pattern.expired(Utc::now()));
    }

    #[test]
    fn expired_once_end_time_passes() {
        let now = Utc::now();
        let pattern = OverridePattern::new("devices/*", Some(now - Duration::seconds(1)), false);
        assert!(pattern.expired(now));
    }
}
