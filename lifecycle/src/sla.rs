//! SLA deadlines
//!
//! Pure mapping from (priority, creation time) to a business deadline, plus
//! the clock abstraction the engine reads "now" from.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, LifecycleResult};
use crate::state::Priority;

/// Source of the current time
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for simulations and tests
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = at;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Longest SLA budget accepted for any priority (ten years)
pub const MAX_SLA_HOURS: u32 = 87_600;

/// Per-priority SLA budget in hours
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaPolicy {
    pub low_hours: u32,
    pub medium_hours: u32,
    pub high_hours: u32,
    pub urgent_hours: u32,
}

impl Default for SlaPolicy {
    fn default() -> Self {
        Self {
            low_hours: 120,
            medium_hours: 96,
            high_hours: 48,
            urgent_hours: 24,
        }
    }
}

impl SlaPolicy {
    /// SLA budget for a priority, in hours
    pub fn hours(&self, priority: Priority) -> u32 {
        match priority {
            Priority::Low => self.low_hours,
            Priority::Medium => self.medium_hours,
            Priority::High => self.high_hours,
            Priority::Urgent => self.urgent_hours,
        }
    }

    /// Reject tables with a zero budget or one above [`MAX_SLA_HOURS`]
    pub fn validate(&self) -> LifecycleResult<()> {
        for priority in Priority::all() {
            let hours = self.hours(*priority);
            if hours == 0 {
                return Err(LifecycleError::invalid_input(format!(
                    "SLA for {} priority must be at least one hour",
                    priority
                )));
            }
            if hours > MAX_SLA_HOURS {
                return Err(LifecycleError::invalid_input(format!(
                    "SLA for {} priority is {}h, the maximum is {}h",
                    priority, hours, MAX_SLA_HOURS
                )));
            }
        }
        Ok(())
    }

    /// Deadline for a report created at `created_at`.
    ///
    /// Fails with `InvalidInput` when the deadline falls outside the
    /// representable date range.
    pub fn deadline(
        &self,
        priority: Priority,
        created_at: DateTime<Utc>,
    ) -> LifecycleResult<DateTime<Utc>> {
        let hours = self.hours(priority);
        created_at
            .checked_add_signed(Duration::hours(i64::from(hours)))
            .ok_or_else(|| {
                LifecycleError::invalid_input(format!(
                    "SLA of {}h from {} is out of range",
                    hours, created_at
                ))
            })
    }

    /// Whether the deadline has strictly passed at `now`
    pub fn is_breached(
        &self,
        priority: Priority,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> LifecycleResult<bool> {
        Ok(now > self.deadline(priority, created_at)?)
    }

    /// Time left before the deadline; zero once breached
    pub fn remaining(
        &self,
        priority: Priority,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> LifecycleResult<Duration> {
        let left = self.deadline(priority, created_at)? - now;
        Ok(left.max(Duration::zero()))
    }

    /// How far past the deadline `now` is, if at all
    pub fn overdue_by(
        &self,
        priority: Priority,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> LifecycleResult<Option<Duration>> {
        let over = now - self.deadline(priority, created_at)?;
        Ok((over > Duration::zero()).then_some(over))
    }

    /// Table view, lowest priority first
    pub fn table(&self) -> BTreeMap<Priority, u32> {
        Priority::all()
            .iter()
            .map(|p| (*p, self.hours(*p)))
            .collect()
    }
}

/// Deadline summary for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaStatus {
    pub deadline: DateTime<Utc>,
    pub breached: bool,
    pub remaining_minutes: i64,
    pub overdue_minutes: i64,
}

impl SlaStatus {
    pub fn compute(
        policy: &SlaPolicy,
        priority: Priority,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> LifecycleResult<Self> {
        let deadline = policy.deadline(priority, created_at)?;
        let left = deadline - now;
        Ok(Self {
            deadline,
            breached: now > deadline,
            remaining_minutes: left.max(Duration::zero()).num_minutes(),
            overdue_minutes: (-left).max(Duration::zero()).num_minutes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_default_table() {
        let policy = SlaPolicy::default();
        assert_eq!(policy.hours(Priority::Low), 120);
        assert_eq!(policy.hours(Priority::Medium), 96);
        assert_eq!(policy.hours(Priority::High), 48);
        assert_eq!(policy.hours(Priority::Urgent), 24);
    }

    #[test]
    fn test_breach_is_strict() {
        let policy = SlaPolicy::default();
        let deadline = policy.deadline(Priority::Urgent, t0()).unwrap();
        assert_eq!(deadline, t0() + Duration::hours(24));

        assert!(!policy.is_breached(Priority::Urgent, t0(), deadline).unwrap());
        assert!(policy
            .is_breached(Priority::Urgent, t0(), deadline + Duration::seconds(1))
            .unwrap());
    }

    #[test]
    fn test_remaining_and_overdue() {
        let policy = SlaPolicy::default();
        let now = t0() + Duration::hours(25);

        assert_eq!(
            policy.remaining(Priority::Urgent, t0(), now).unwrap(),
            Duration::zero()
        );
        assert_eq!(
            policy.overdue_by(Priority::Urgent, t0(), now).unwrap(),
            Some(Duration::hours(1))
        );
        assert_eq!(
            policy.remaining(Priority::High, t0(), now).unwrap(),
            Duration::hours(23)
        );
        assert_eq!(policy.overdue_by(Priority::High, t0(), now).unwrap(), None);
    }

    #[test]
    fn test_zero_budget_rejected() {
        let policy = SlaPolicy {
            high_hours: 0,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
        assert!(SlaPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_oversized_budget_rejected() {
        let policy = SlaPolicy {
            urgent_hours: u32::MAX,
            ..Default::default()
        };
        let err = policy.validate().unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");

        let ceiling = SlaPolicy {
            low_hours: MAX_SLA_HOURS,
            ..Default::default()
        };
        assert!(ceiling.validate().is_ok());
    }

    #[test]
    fn test_unrepresentable_deadline_is_an_error() {
        let policy = SlaPolicy {
            urgent_hours: u32::MAX,
            ..Default::default()
        };
        let late = DateTime::<Utc>::MAX_UTC - Duration::days(1);
        let err = policy.deadline(Priority::Urgent, late).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
        assert!(SlaStatus::compute(&policy, Priority::Urgent, late, late).is_err());
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(t0());
        clock.advance(Duration::hours(3));
        assert_eq!(clock.now(), t0() + Duration::hours(3));
    }

    #[test]
    fn test_sla_status_summary() {
        let status = SlaStatus::compute(
            &SlaPolicy::default(),
            Priority::Urgent,
            t0(),
            t0() + Duration::hours(26),
        )
        .unwrap();
        assert!(status.breached);
        assert_eq!(status.overdue_minutes, 120);
        assert_eq!(status.remaining_minutes, 0);
    }
}
