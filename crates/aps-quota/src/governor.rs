//! Quota governor
//!
//! Admits a request only if both the subject's hourly and daily windows
//! have room, and then counts it against both. A denied request leaves
//! every counter untouched.

use crate::window::{QuotaWindow, SubjectLedger, WindowKey, WindowSpan};
use aps_core::{spawn_periodic, system_clock, QuotaConfig, SharedClock, Tier, TierLimits};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Usage of one window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowUsage {
    /// Requests admitted so far
    pub used: u32,
    /// Limit for the tier
    pub limit: u32,
    /// When the window resets
    pub reset_at: DateTime<Utc>,
}

impl WindowUsage {
    /// Requests still admissible
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }
}

/// Read-only snapshot of a subject's quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStatus {
    /// Current hourly window
    pub hourly: WindowUsage,
    /// Current daily window
    pub daily: WindowUsage,
}

/// Outcome of a quota check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    /// Request admitted and counted
    Allowed {
        /// Hourly usage after counting this request
        hourly: WindowUsage,
        /// Daily usage after counting this request
        daily: WindowUsage,
    },
    /// Request rejected, nothing counted
    Denied {
        /// Window that is exhausted
        window: WindowSpan,
        /// When that window resets
        reset_at: DateTime<Utc>,
        /// User-facing explanation
        message: String,
    },
}

impl QuotaDecision {
    /// Whether the request was admitted
    #[inline]
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Per-subject sliding-window quota counters
#[derive(Debug)]
pub struct QuotaGovernor {
    config: QuotaConfig,
    ledgers: DashMap<String, SubjectLedger>,
    clock: SharedClock,
}

impl QuotaGovernor {
    /// Create governor on the system clock
    #[inline]
    #[must_use]
    pub fn new(config: QuotaConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Create governor on a specific clock
    #[inline]
    #[must_use]
    pub fn with_clock(config: QuotaConfig, clock: SharedClock) -> Self {
        Self {
            config,
            ledgers: DashMap::new(),
            clock,
        }
    }

    /// Admit and count a request, or reject it without counting
    #[inline]
    pub fn check_and_consume(&self, subject_id: &str, tier: Tier) -> bool {
        self.try_consume(subject_id, tier).is_allowed()
    }

    /// Typed form of [`QuotaGovernor::check_and_consume`]
    pub fn try_consume(&self, subject_id: &str, tier: Tier) -> QuotaDecision {
        let now = self.clock.now();
        let limits = self.config.limits(tier);
        let hourly = WindowKey::at(WindowSpan::Hourly, now);
        let daily = WindowKey::at(WindowSpan::Daily, now);

        // The shard guard is held for the whole read-compare-write.
        let decision = match self.ledgers.entry(subject_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                decide(occupied.get_mut(), subject_id, tier, limits, hourly, daily)
            }
            Entry::Vacant(vacant) => {
                let mut ledger = SubjectLedger::default();
                let decision = decide(&mut ledger, subject_id, tier, limits, hourly, daily);
                if decision.is_allowed() {
                    vacant.insert(ledger);
                }
                decision
            }
        };

        match &decision {
            QuotaDecision::Allowed { hourly, daily } => tracing::debug!(
                subject = subject_id,
                %tier,
                hourly_used = hourly.used,
                daily_used = daily.used,
                "quota consumed"
            ),
            QuotaDecision::Denied { window, reset_at, .. } => tracing::info!(
                subject = subject_id,
                %tier,
                %window,
                %reset_at,
                "quota exceeded"
            ),
        }
        decision
    }

    /// Current usage; never creates or changes a window
    #[must_use]
    pub fn status(&self, subject_id: &str, tier: Tier) -> QuotaStatus {
        let now = self.clock.now();
        let limits = self.config.limits(tier);
        let hourly = WindowKey::at(WindowSpan::Hourly, now);
        let daily = WindowKey::at(WindowSpan::Daily, now);

        let (hourly_used, daily_used) = self
            .ledgers
            .get(subject_id)
            .map_or((0, 0), |ledger| (ledger.used(hourly), ledger.used(daily)));

        QuotaStatus {
            hourly: WindowUsage {
                used: hourly_used,
                limit: limits.hourly,
                reset_at: hourly.reset_at(),
            },
            daily: WindowUsage {
                used: daily_used,
                limit: limits.daily,
                reset_at: daily.reset_at(),
            },
        }
    }

    /// Copy of the window currently counting `span` for a subject
    #[must_use]
    pub fn window(&self, subject_id: &str, span: WindowSpan) -> Option<QuotaWindow> {
        let key = WindowKey::at(span, self.clock.now());
        self.ledgers
            .get(subject_id)
            .and_then(|ledger| ledger.window(key).cloned())
    }

    /// Remove windows whose bucket has elapsed
    ///
    /// Returns the number of windows removed. Subjects left without any
    /// window are dropped too.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.ledgers.retain(|_, ledger| {
            removed += ledger.prune(now);
            !ledger.is_empty()
        });
        if removed > 0 {
            tracing::debug!(removed, "swept elapsed quota windows");
        }
        removed
    }

    /// Number of subjects with at least one live window
    #[inline]
    #[must_use]
    pub fn tracked_subjects(&self) -> usize {
        self.ledgers.len()
    }

    /// Configured limits for a tier
    #[inline]
    #[must_use]
    pub fn limits(&self, tier: Tier) -> TierLimits {
        self.config.limits(tier)
    }

    /// Run [`QuotaGovernor::sweep_expired`] periodically
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        spawn_periodic(self, every, "quota", |governor: &Self| {
            governor.sweep_expired();
        })
    }
}

fn decide(
    ledger: &mut SubjectLedger,
    subject_id: &str,
    tier: Tier,
    limits: TierLimits,
    hourly: WindowKey,
    daily: WindowKey,
) -> QuotaDecision {
    if ledger.used(hourly) >= limits.hourly {
        return denied(tier, WindowSpan::Hourly, limits.hourly, hourly.reset_at());
    }
    if ledger.used(daily) >= limits.daily {
        return denied(tier, WindowSpan::Daily, limits.daily, daily.reset_at());
    }

    let hourly_used = ledger.increment(subject_id, tier, hourly, limits.hourly);
    let daily_used = ledger.increment(subject_id, tier, daily, limits.daily);
    QuotaDecision::Allowed {
        hourly: WindowUsage {
            used: hourly_used,
            limit: limits.hourly,
            reset_at: hourly.reset_at(),
        },
        daily: WindowUsage {
            used: daily_used,
            limit: limits.daily,
            reset_at: daily.reset_at(),
        },
    }
}

fn denied(tier: Tier, window: WindowSpan, limit: u32, reset_at: DateTime<Utc>) -> QuotaDecision {
    let period = match window {
        WindowSpan::Hourly => "hourly",
        WindowSpan::Daily => "daily",
    };
    let mut message = format!(
        "You have used all {limit} {period} requests on the {tier} plan. Try again after {} UTC.",
        reset_at.format("%Y-%m-%d %H:%M")
    );
    if let Some(next) = tier.upgrade() {
        message.push_str(&format!(" Upgrade to {next} for higher limits."));
    }
    QuotaDecision::Denied {
        window,
        reset_at,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aps_core::ManualClock;

    fn governor() -> (QuotaGovernor, ManualClock) {
        let clock = ManualClock::at_epoch();
        (
            QuotaGovernor::with_clock(QuotaConfig::default(), clock.shared()),
            clock,
        )
    }

    #[test]
    fn free_tier_allows_ten_per_hour() {
        let (gov, _) = governor();
        for _ in 0..10 {
            assert!(gov.check_and_consume("u1", Tier::Free));
        }
        assert!(!gov.check_and_consume("u1", Tier::Free));

        let status = gov.status("u1", Tier::Free);
        assert_eq!(status.hourly.used, 10);
        assert_eq!(status.hourly.limit, 10);
        assert_eq!(status.daily.used, 10);
        assert_eq!(status.daily.limit, 50);
    }

    #[test]
    fn denied_call_does_not_count() {
        let (gov, _) = governor();
        for _ in 0..10 {
            gov.check_and_consume("u1", Tier::Free);
        }
        let before = gov.status("u1", Tier::Free);
        for _ in 0..5 {
            assert!(!gov.check_and_consume("u1", Tier::Free));
        }
        assert_eq!(gov.status("u1", Tier::Free), before);
    }

    #[test]
    fn hourly_window_rolls_over() {
        let (gov, clock) = governor();
        for _ in 0..10 {
            gov.check_and_consume("u1", Tier::Free);
        }
        assert!(!gov.check_and_consume("u1", Tier::Free));

        clock.advance(Duration::from_secs(3600));
        assert!(gov.check_and_consume("u1", Tier::Free));
        let status = gov.status("u1", Tier::Free);
        assert_eq!(status.hourly.used, 1);
        assert_eq!(status.daily.used, 11);
    }

    #[test]
    fn daily_limit_binds_across_hours() {
        let (gov, clock) = governor();
        for _ in 0..5 {
            for _ in 0..10 {
                assert!(gov.check_and_consume("u1", Tier::Free));
            }
            clock.advance(Duration::from_secs(3600));
        }
        match gov.try_consume("u1", Tier::Free) {
            QuotaDecision::Denied { window, .. } => assert_eq!(window, WindowSpan::Daily),
            other => panic!("expected daily denial, got {other:?}"),
        }
    }

    #[test]
    fn subjects_are_independent() {
        let (gov, _) = governor();
        for _ in 0..10 {
            gov.check_and_consume("a", Tier::Free);
        }
        assert!(!gov.check_and_consume("a", Tier::Free));
        assert!(gov.check_and_consume("b", Tier::Free));
    }

    #[test]
    fn status_is_read_only() {
        let (gov, _) = governor();
        let status = gov.status("ghost", Tier::Premium);
        assert_eq!(status.hourly.used, 0);
        assert_eq!(status.hourly.limit, 100);
        assert_eq!(gov.tracked_subjects(), 0);
    }

    #[test]
    fn denial_message_suggests_upgrade() {
        let (gov, _) = governor();
        for _ in 0..10 {
            gov.check_and_consume("u1", Tier::Free);
        }
        let QuotaDecision::Denied { message, reset_at, .. } = gov.try_consume("u1", Tier::Free)
        else {
            panic!("expected denial");
        };
        assert!(message.contains("premium"));
        assert_eq!(reset_at, gov.status("u1", Tier::Free).hourly.reset_at);
    }

    #[test]
    fn window_snapshot_records_tier_and_key() {
        let (gov, _) = governor();
        gov.check_and_consume("u1", Tier::Premium);
        let window = gov.window("u1", WindowSpan::Hourly).unwrap();
        assert_eq!(window.count, 1);
        assert_eq!(window.limit, 100);
        assert_eq!(window.tier, Tier::Premium);
        assert!(window.window_key.starts_with("u1:hourly:"));
    }

    #[test]
    fn sweep_reaps_elapsed_windows() {
        let (gov, clock) = governor();
        gov.check_and_consume("u1", Tier::Free);
        assert_eq!(gov.sweep_expired(), 0);

        clock.advance(Duration::from_secs(3600));
        assert_eq!(gov.sweep_expired(), 1);
        assert_eq!(gov.tracked_subjects(), 1);

        clock.advance(Duration::from_secs(86_400));
        assert_eq!(gov.sweep_expired(), 1);
        assert_eq!(gov.tracked_subjects(), 0);
    }

    #[test]
    fn concurrent_checks_never_overadmit() {
        let (gov, _) = governor();
        let admitted = std::sync::atomic::AtomicU32::new(0);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..10 {
                        if gov.check_and_consume("shared", Tier::Free) {
                            admitted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                });
            }
        });
        assert_eq!(admitted.into_inner(), 10);
        assert_eq!(gov.status("shared", Tier::Free).hourly.used, 10);
    }
}
