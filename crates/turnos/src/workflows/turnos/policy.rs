use std::time::Duration;

use chrono::NaiveTime;

use super::calendar::ServiceWindow;

/// What approval does when a line would drive stock below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StockPolicy {
    /// Decrement regardless; stock may go negative and staff reconcile by hand.
    #[default]
    Permissive,
    /// Refuse the approval with `InsufficientStock`.
    Strict,
}

impl StockPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "permissive" => Some(Self::Permissive),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }
}

/// Rules governing quotas, capacity and when turnos may be booked or cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingPolicy {
    pub monthly_quota: u32,
    pub daily_capacity: u32,
    pub window: ServiceWindow,
    pub booking_horizon_days: u32,
    pub cancel_lead_days: u32,
    pub stock_policy: StockPolicy,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            monthly_quota: 2,
            daily_capacity: 30,
            window: ServiceWindow::default(),
            booking_horizon_days: 60,
            cancel_lead_days: 7,
            stock_policy: StockPolicy::Permissive,
        }
    }
}

/// Controls the periodic expiry of uncollected turnos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepPolicy {
    /// Local time after which today's uncollected turnos count as missed.
    pub cutoff: NaiveTime,
    pub interval: Duration,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            cutoff: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
            interval: Duration::from_secs(3600),
        }
    }
}
