//! Fixed validity windows.
//!
//! `notAfter` is always `notBefore` plus a whole number of calendar years.
//! When the start date is February 29 and the target year is not a leap
//! year, the end date is clamped to February 28.

use time::{Month, OffsetDateTime};

use crate::{Error, Result};

/// Validity of the self-signed root, in years.
pub const ROOT_VALIDITY_YEARS: i32 = 10;

/// Validity of every leaf certificate, in years.
pub const LEAF_VALIDITY_YEARS: i32 = 1;

/// A `[not_before, not_after]` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validity {
    /// Start of the window.
    pub not_before: OffsetDateTime,
    /// End of the window.
    pub not_after: OffsetDateTime,
}

impl Validity {
    /// Window starting at `not_before` and lasting `years` calendar years.
    pub fn years_from(not_before: OffsetDateTime, years: i32) -> Result<Self> {
        Ok(Self {
            not_before,
            not_after: add_years(not_before, years)?,
        })
    }

    /// Root window starting now.
    pub fn root() -> Result<Self> {
        Self::years_from(now()?, ROOT_VALIDITY_YEARS)
    }

    /// Leaf window starting now.
    pub fn leaf() -> Result<Self> {
        Self::years_from(now()?, LEAF_VALIDITY_YEARS)
    }
}

/// Current UTC time truncated to whole seconds (X.509 time precision).
pub fn now() -> Result<OffsetDateTime> {
    let secs = OffsetDateTime::now_utc().unix_timestamp();
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| Error::Internal(format!("System time out of range: {e}")))
}

/// Add whole calendar years, clamping Feb 29 to Feb 28 in non-leap years.
pub fn add_years(start: OffsetDateTime, years: i32) -> Result<OffsetDateTime> {
    let target = start
        .year()
        .checked_add(years)
        .ok_or_else(|| Error::Internal(format!("Year overflow adding {years} years")))?;

    let start = if start.month() == Month::February
        && start.day() == 29
        && !time::util::is_leap_year(target)
    {
        start
            .replace_day(28)
            .map_err(|e| Error::Internal(format!("Date calculation error: {e}")))?
    } else {
        start
    };

    start
        .replace_year(target)
        .map_err(|e| Error::Internal(format!("Date calculation error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn adds_calendar_years_keeping_time_of_day() {
        let start = datetime!(2025-06-15 13:45:10 UTC);
        assert_eq!(add_years(start, 1).unwrap(), datetime!(2026-06-15 13:45:10 UTC));
        assert_eq!(add_years(start, 10).unwrap(), datetime!(2035-06-15 13:45:10 UTC));
    }

    #[test]
    fn leap_day_clamps_to_feb_28_in_common_year() {
        // GIVEN: a start on Feb 29
        let start = datetime!(2024-02-29 08:00 UTC);
        // WHEN: adding one year (2025 is not a leap year)
        let end = add_years(start, 1).unwrap();
        // THEN: clamped to Feb 28, never rolled into March
        assert_eq!(end, datetime!(2025-02-28 08:00 UTC));
    }

    #[test]
    fn leap_day_is_kept_when_target_is_leap_year() {
        let start = datetime!(2024-02-29 08:00 UTC);
        assert_eq!(add_years(start, 4).unwrap(), datetime!(2028-02-29 08:00 UTC));
    }

    #[test]
    fn root_window_is_ten_years_leaf_window_is_one() {
        let start = datetime!(2026-10-19 00:00 UTC);
        let root = Validity::years_from(start, ROOT_VALIDITY_YEARS).unwrap();
        let leaf = Validity::years_from(start, LEAF_VALIDITY_YEARS).unwrap();
        assert_eq!(root.not_after, datetime!(2036-10-19 00:00 UTC));
        assert_eq!(leaf.not_after, datetime!(2027-10-19 00:00 UTC));
    }

    #[test]
    fn now_has_no_subsecond_component() {
        assert_eq!(now().unwrap().nanosecond(), 0);
    }
}
