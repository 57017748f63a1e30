use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};

/// Weekly opening pattern of the dispensary counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceWindow {
    pub days: Vec<Weekday>,
    pub opens_at: NaiveTime,
    pub closes_at: NaiveTime,
    pub slot_minutes: u32,
}

impl Default for ServiceWindow {
    fn default() -> Self {
        Self {
            days: vec![Weekday::Tue, Weekday::Thu],
            opens_at: NaiveTime::from_hms_opt(13, 0, 0).unwrap_or(NaiveTime::MIN),
            closes_at: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
            slot_minutes: 6,
        }
    }
}

impl ServiceWindow {
    pub fn is_service_day(&self, date: NaiveDate) -> bool {
        self.days.contains(&date.weekday())
    }

    pub fn contains(&self, at: NaiveDateTime) -> bool {
        self.is_service_day(at.date()) && at.time() >= self.opens_at && at.time() < self.closes_at
    }

    /// Start time of the `index`-th slot of a day, if it still falls inside the window.
    pub fn slot_at(&self, date: NaiveDate, index: u32) -> Option<NaiveDateTime> {
        let offset = Duration::minutes(i64::from(index) * i64::from(self.slot_minutes.max(1)));
        let start = date.and_time(self.opens_at);
        let slot = start.checked_add_signed(offset)?;
        (slot.date() == date && slot.time() < self.closes_at).then_some(slot)
    }

    pub fn slots_per_day(&self) -> u32 {
        let open_minutes = (self.closes_at - self.opens_at).num_minutes().max(0);
        (open_minutes / i64::from(self.slot_minutes.max(1))) as u32
    }
}

/// Dates on which the pharmacy does not serve turnos (holidays, closures).
pub trait BlockedDates: Send + Sync {
    fn is_blocked(&self, date: NaiveDate) -> bool;
}

/// Runtime-editable set of blocked dates.
#[derive(Debug, Default)]
pub struct BlockedDateCalendar {
    dates: RwLock<BTreeSet<NaiveDate>>,
}

impl BlockedDateCalendar {
    pub fn new<I>(dates: I) -> Self
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        Self {
            dates: RwLock::new(dates.into_iter().collect()),
        }
    }

    pub fn block(&self, date: NaiveDate) {
        self.dates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(date);
    }

    pub fn unblock(&self, date: NaiveDate) -> bool {
        self.dates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&date)
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.dates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }
}

impl BlockedDates for BlockedDateCalendar {
    fn is_blocked(&self, date: NaiveDate) -> bool {
        self.dates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&date)
    }
}
