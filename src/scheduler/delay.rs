//! Delay units accepted when scheduling a flow.

use chrono::{DateTime, Datelike, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::SchedulerError;

const MIN_YEAR: i32 = 0;
const MAX_YEAR: i32 = 9999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl DelayUnit {
    pub const ALL: [DelayUnit; 4] = [
        DelayUnit::Minutes,
        DelayUnit::Hours,
        DelayUnit::Days,
        DelayUnit::Weeks,
    ];

    /// Length of one unit in milliseconds.
    pub fn as_millis(&self) -> i64 {
        match self {
            DelayUnit::Minutes => 60 * 1000,
            DelayUnit::Hours => 60 * 60 * 1000,
            DelayUnit::Days => 24 * 60 * 60 * 1000,
            DelayUnit::Weeks => 7 * 24 * 60 * 60 * 1000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DelayUnit::Minutes => "minutes",
            DelayUnit::Hours => "hours",
            DelayUnit::Days => "days",
            DelayUnit::Weeks => "weeks",
        }
    }

    /// `amount` units as a signed duration.
    ///
    /// Zero and negative amounts are allowed and produce an already-elapsed delay.
    pub fn delay(&self, amount: i64) -> Result<TimeDelta, SchedulerError> {
        amount
            .checked_mul(self.as_millis())
            .and_then(TimeDelta::try_milliseconds)
            .ok_or(SchedulerError::DelayOutOfRange {
                amount,
                unit: *self,
            })
    }

    /// The instant `amount` units after `now`.
    ///
    /// The result must fall in years 0 through 9999, the range stored
    /// timestamps can hold with a four-digit year.
    pub fn after(&self, now: DateTime<Utc>, amount: i64) -> Result<DateTime<Utc>, SchedulerError> {
        now.checked_add_signed(self.delay(amount)?)
            .filter(|at| (MIN_YEAR..=MAX_YEAR).contains(&at.year()))
            .ok_or(SchedulerError::DelayOutOfRange {
                amount,
                unit: *self,
            })
    }
}

impl std::fmt::Display for DelayUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DelayUnit {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DelayUnit::ALL
            .into_iter()
            .find(|unit| unit.as_str() == s)
            .ok_or_else(|| SchedulerError::InvalidDelayUnit(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_lengths() {
        assert_eq!(DelayUnit::Minutes.as_millis(), 60_000);
        assert_eq!(DelayUnit::Hours.as_millis(), 3_600_000);
        assert_eq!(DelayUnit::Days.as_millis(), 86_400_000);
        assert_eq!(DelayUnit::Weeks.as_millis(), 604_800_000);
    }

    #[test]
    fn test_after_adds_amount_times_unit() {
        let now = Utc::now();
        for unit in DelayUnit::ALL {
            let at = unit.after(now, 3).unwrap();
            assert_eq!((at - now).num_milliseconds(), 3 * unit.as_millis(), "{unit}");
        }
    }

    #[test]
    fn test_non_positive_amounts_are_already_elapsed() {
        let now = Utc::now();
        assert_eq!(DelayUnit::Hours.after(now, 0).unwrap(), now);
        assert!(DelayUnit::Days.after(now, -1).unwrap() < now);
    }

    #[test]
    fn test_overflow_is_rejected() {
        let err = DelayUnit::Weeks.delay(i64::MAX).unwrap_err();
        assert!(matches!(err, SchedulerError::DelayOutOfRange { .. }));
    }

    #[test]
    fn test_dates_beyond_four_digit_years_are_rejected() {
        let now = Utc::now();
        for amount in [500_000, -200_000] {
            let err = DelayUnit::Weeks.after(now, amount).unwrap_err();
            assert!(matches!(err, SchedulerError::DelayOutOfRange { .. }), "{amount}");
        }
        // Still within year 9999.
        assert!(DelayUnit::Weeks.after(now, 100_000).is_ok());
    }

    #[test]
    fn test_parse_units() {
        assert_eq!("weeks".parse::<DelayUnit>().unwrap(), DelayUnit::Weeks);
        let err = "fortnights".parse::<DelayUnit>().unwrap_err();
        assert_eq!(err.to_string(), "invalid delay unit 'fortnights' (expected minutes, hours, days or weeks)");
    }
}
