use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};

use super::calendar::{BlockedDates, ServiceWindow};
use super::error::TurnoError;
use super::repository::TurnoQueries;

/// Finds the earliest free slot on an upcoming service day.
#[derive(Clone)]
pub struct SlotAllocator {
    window: ServiceWindow,
    daily_capacity: u32,
    horizon_days: u32,
    calendar: Arc<dyn BlockedDates>,
}

impl SlotAllocator {
    pub fn new(
        window: ServiceWindow,
        daily_capacity: u32,
        horizon_days: u32,
        calendar: Arc<dyn BlockedDates>,
    ) -> Self {
        Self {
            window,
            daily_capacity,
            horizon_days,
            calendar,
        }
    }

    /// Days the allocator may hand out: service weekdays that are not blocked.
    pub fn is_bookable_day(&self, date: NaiveDate) -> bool {
        self.window.is_service_day(date) && !self.calendar.is_blocked(date)
    }

    /// Scans from the day after `now` up to the booking horizon and returns the earliest slot
    /// no active turno holds. A day is full once it holds `daily_capacity` active turnos or
    /// every slot of its window is taken.
    pub fn next_available_slot<Q>(
        &self,
        queries: &Q,
        now: NaiveDateTime,
    ) -> Result<NaiveDateTime, TurnoError>
    where
        Q: TurnoQueries + ?Sized,
    {
        let today = now.date();
        for offset in 1..=i64::from(self.horizon_days) {
            let Some(date) = today.checked_add_signed(Duration::days(offset)) else {
                break;
            };
            if !self.is_bookable_day(date) {
                continue;
            }

            let taken = queries.active_slots_on(date)?;
            if taken.len() >= self.daily_capacity as usize {
                continue;
            }
            if let Some(slot) = self.first_free_slot(date, &taken) {
                return Ok(slot);
            }
        }

        Err(TurnoError::NoSlotAvailable {
            horizon_days: self.horizon_days,
        })
    }

    fn first_free_slot(&self, date: NaiveDate, taken: &[NaiveDateTime]) -> Option<NaiveDateTime> {
        (0..self.window.slots_per_day())
            .filter_map(|index| self.window.slot_at(date, index))
            .find(|slot| !taken.contains(slot))
    }
}
