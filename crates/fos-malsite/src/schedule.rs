//! Block list refresh schedule
//!
//! Tracks when the hash prefixes and the filter set were last refreshed and
//! reports which refresh is due under the current settings. The repository
//! owner drives the actual downloads.

use crate::settings::Settings;
use std::time::{Duration, Instant};

/// Which part of the block list to refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    HashPrefixes,
    FilterSet,
}

#[derive(Debug, Clone, Default)]
pub struct RefreshSchedule {
    last_hash_prefix_refresh: Option<Instant>,
    last_filter_set_refresh: Option<Instant>,
}

impl RefreshSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed refresh
    pub fn record(&mut self, kind: RefreshKind, at: Instant) {
        match kind {
            RefreshKind::HashPrefixes => self.last_hash_prefix_refresh = Some(at),
            RefreshKind::FilterSet => self.last_filter_set_refresh = Some(at),
        }
    }

    /// Refreshes due at `now`. Never-refreshed parts are always due;
    /// a non-positive frequency disables that refresh.
    pub fn due(&self, settings: &Settings, now: Instant) -> Vec<RefreshKind> {
        let mut due = Vec::new();
        if is_due(
            self.last_hash_prefix_refresh,
            settings.hash_prefix_update_frequency,
            now,
        ) {
            due.push(RefreshKind::HashPrefixes);
        }
        if is_due(
            self.last_filter_set_refresh,
            settings.filter_set_update_frequency,
            now,
        ) {
            due.push(RefreshKind::FilterSet);
        }
        due
    }

    /// Time until the next refresh becomes due, `None` if all are disabled
    pub fn next_due_in(&self, settings: &Settings, now: Instant) -> Option<Duration> {
        [
            (self.last_hash_prefix_refresh, settings.hash_prefix_update_frequency),
            (self.last_filter_set_refresh, settings.filter_set_update_frequency),
        ]
        .into_iter()
        .filter_map(|(last, minutes)| {
            let interval = interval(minutes)?;
            Some(match last {
                Some(last) => (last + interval).saturating_duration_since(now),
                None => Duration::ZERO,
            })
        })
        .min()
    }
}

fn interval(minutes: i64) -> Option<Duration> {
    if minutes <= 0 {
        return None;
    }
    Some(Duration::from_secs((minutes as u64).saturating_mul(60)))
}

fn is_due(last: Option<Instant>, minutes: i64, now: Instant) -> bool {
    let Some(interval) = interval(minutes) else {
        return false;
    };
    match last {
        Some(last) => now.saturating_duration_since(last) >= interval,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_everything_due_initially() {
        let schedule = RefreshSchedule::new();
        let due = schedule.due(&Settings::default(), Instant::now());
        assert_eq!(due, vec![RefreshKind::HashPrefixes, RefreshKind::FilterSet]);
    }

    #[test]
    fn test_default_cadences() {
        let start = Instant::now();
        let mut schedule = RefreshSchedule::new();
        schedule.record(RefreshKind::HashPrefixes, start);
        schedule.record(RefreshKind::FilterSet, start);
        let settings = Settings::default();

        assert!(schedule.due(&settings, start + 19 * MINUTE).is_empty());
        assert_eq!(
            schedule.due(&settings, start + 20 * MINUTE),
            vec![RefreshKind::HashPrefixes]
        );
        assert_eq!(
            schedule.due(&settings, start + 720 * MINUTE),
            vec![RefreshKind::HashPrefixes, RefreshKind::FilterSet]
        );
        assert_eq!(
            schedule.next_due_in(&settings, start + 5 * MINUTE),
            Some(15 * MINUTE)
        );
    }

    #[test]
    fn test_non_positive_frequency_disables() {
        let settings = Settings {
            hash_prefix_update_frequency: 0,
            filter_set_update_frequency: -1,
        };
        let schedule = RefreshSchedule::new();
        assert!(schedule.due(&settings, Instant::now()).is_empty());
        assert_eq!(schedule.next_due_in(&settings, Instant::now()), None);
    }
}
