//! Fixed calendar windows used for quota counting

use aps_core::Tier;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Length of a counting window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowSpan {
    /// One calendar hour (UTC)
    Hourly,
    /// One calendar day (UTC)
    Daily,
}

impl WindowSpan {
    /// Window length in seconds
    #[inline]
    #[must_use]
    pub const fn seconds(self) -> i64 {
        match self {
            WindowSpan::Hourly => 3_600,
            WindowSpan::Daily => 86_400,
        }
    }
}

impl fmt::Display for WindowSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WindowSpan::Hourly => "hourly",
            WindowSpan::Daily => "daily",
        })
    }
}

/// Identifies one time bucket of one span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WindowKey {
    pub(crate) span: WindowSpan,
    pub(crate) bucket: i64,
}

impl WindowKey {
    /// Bucket containing `now`
    pub(crate) fn at(span: WindowSpan, now: DateTime<Utc>) -> Self {
        Self {
            span,
            bucket: now.timestamp().div_euclid(span.seconds()),
        }
    }

    /// First instant after this bucket
    pub(crate) fn reset_at(self) -> DateTime<Utc> {
        let secs = (self.bucket + 1).saturating_mul(self.span.seconds());
        Utc.timestamp_opt(secs, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Stable textual key (`subject:span:bucket`)
    pub(crate) fn render(self, subject: &str) -> String {
        format!("{subject}:{}:{}", self.span, self.bucket)
    }
}

/// Counter for one subject within one time bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaWindow {
    /// Subject the window belongs to
    pub subject_id: String,
    /// Tier in effect at the last increment
    pub tier: Tier,
    /// `subject:span:bucket`
    pub window_key: String,
    /// Requests admitted in this window
    pub count: u32,
    /// Limit in effect at the last increment
    pub limit: u32,
    /// When the window stops counting
    pub reset_at: DateTime<Utc>,
}

/// All live windows of one subject
///
/// Both windows of a check are read and written under the same map shard
/// guard, which is what makes check-and-increment atomic.
#[derive(Debug, Default)]
pub(crate) struct SubjectLedger {
    windows: HashMap<WindowKey, QuotaWindow>,
}

impl SubjectLedger {
    pub(crate) fn used(&self, key: WindowKey) -> u32 {
        self.windows.get(&key).map_or(0, |w| w.count)
    }

    pub(crate) fn increment(&mut self, subject: &str, tier: Tier, key: WindowKey, limit: u32) -> u32 {
        let window = self.windows.entry(key).or_insert_with(|| QuotaWindow {
            subject_id: subject.to_string(),
            tier,
            window_key: key.render(subject),
            count: 0,
            limit,
            reset_at: key.reset_at(),
        });
        window.tier = tier;
        window.limit = limit;
        window.count += 1;
        window.count
    }

    pub(crate) fn window(&self, key: WindowKey) -> Option<&QuotaWindow> {
        self.windows.get(&key)
    }

    /// Drop windows whose bucket has elapsed, returning how many went
    pub(crate) fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| w.reset_at > now);
        before - self.windows.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn buckets_align_to_calendar() {
        let key = WindowKey::at(WindowSpan::Hourly, ts(7_200 + 1_799));
        assert_eq!(key.bucket, 2);
        assert_eq!(key.reset_at(), ts(10_800));

        let key = WindowKey::at(WindowSpan::Daily, ts(86_400 * 3 + 5));
        assert_eq!(key.bucket, 3);
        assert_eq!(key.reset_at(), ts(86_400 * 4));
    }

    #[test]
    fn rendered_key_contains_subject_and_bucket() {
        let key = WindowKey::at(WindowSpan::Hourly, ts(3_600));
        assert_eq!(key.render("user-1"), "user-1:hourly:1");
    }

    #[test]
    fn ledger_increment_and_prune() {
        let mut ledger = SubjectLedger::default();
        let key = WindowKey::at(WindowSpan::Hourly, ts(0));
        assert_eq!(ledger.increment("u", Tier::Free, key, 10), 1);
        assert_eq!(ledger.increment("u", Tier::Free, key, 10), 2);
        assert_eq!(ledger.used(key), 2);

        assert_eq!(ledger.prune(ts(3_599)), 0);
        assert_eq!(ledger.prune(ts(3_600)), 1);
        assert!(ledger.is_empty());
    }
}
