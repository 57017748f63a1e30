use chrono::{Datelike, Months, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use super::domain::RequesterId;
use super::error::TurnoError;
use super::repository::{RepositoryError, TurnoQueries};

/// Outcome of the monthly quota check for a requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaCheck {
    pub allowed: bool,
    pub month: String,
    pub count: u32,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl QuotaCheck {
    pub fn into_result(self) -> Result<Self, TurnoError> {
        if self.allowed {
            Ok(self)
        } else {
            Err(TurnoError::QuotaExceeded {
                count: self.count,
                limit: self.limit,
                month: self.month,
            })
        }
    }
}

/// Outcome of the daily capacity check for a service day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacityCheck {
    pub allowed: bool,
    pub date: NaiveDate,
    pub current_count: u32,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CapacityCheck {
    pub fn into_result(self) -> Result<Self, TurnoError> {
        if self.allowed {
            Ok(self)
        } else {
            Err(TurnoError::CapacityExceeded {
                date: self.date,
                count: self.current_count,
                limit: self.limit,
            })
        }
    }
}

/// Enforces the per-requester monthly quota and the per-day capacity.
///
/// Both checks only count turnos in an active status (pending, approved or completed);
/// rejected and cancelled turnos free their quota unit and their slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityGuard {
    monthly_quota: u32,
    daily_capacity: u32,
}

impl EligibilityGuard {
    pub fn new(monthly_quota: u32, daily_capacity: u32) -> Self {
        Self {
            monthly_quota,
            daily_capacity,
        }
    }

    pub fn monthly_quota(&self) -> u32 {
        self.monthly_quota
    }

    pub fn daily_capacity(&self) -> u32 {
        self.daily_capacity
    }

    /// Counts the requester's active turnos created in the calendar month of `at`.
    pub fn check_monthly_quota<Q>(
        &self,
        queries: &Q,
        requester: &RequesterId,
        at: NaiveDateTime,
    ) -> Result<QuotaCheck, RepositoryError>
    where
        Q: TurnoQueries + ?Sized,
    {
        let (from, until) = month_bounds(at.date());
        let count = queries.count_requester_active_between(requester, from, until)?;
        let allowed = count < self.monthly_quota;
        let month = format!("{:04}-{:02}", at.year(), at.month());
        let reason = (!allowed).then(|| {
            format!(
                "{count} active turnos already requested in {month} (limit {})",
                self.monthly_quota
            )
        });

        Ok(QuotaCheck {
            allowed,
            month,
            count,
            limit: self.monthly_quota,
            reason,
        })
    }

    pub fn check_daily_capacity<Q>(
        &self,
        queries: &Q,
        date: NaiveDate,
    ) -> Result<CapacityCheck, RepositoryError>
    where
        Q: TurnoQueries + ?Sized,
    {
        let current_count = queries.count_active_on(date)?;
        let allowed = current_count < self.daily_capacity;
        let reason = (!allowed).then(|| {
            format!(
                "{date} is full ({current_count} of {} turnos)",
                self.daily_capacity
            )
        });

        Ok(CapacityCheck {
            allowed,
            date,
            current_count,
            limit: self.daily_capacity,
            reason,
        })
    }
}

fn month_bounds(date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let first = date.with_day(1).unwrap_or(date);
    let next = first
        .checked_add_months(Months::new(1))
        .unwrap_or(NaiveDate::MAX);
    (
        first.and_time(NaiveTime::MIN),
        next.and_time(NaiveTime::MIN),
    )
}
