//! `CalendarOracle`: the trading-calendar lookup external collaborator (§6.5).
//!
//! The pipeline consults this for business-day scheduling (monthly/yearly
//! archive ranges, "auto" download scheduling) but does not own the
//! calendar itself — a production deployment would back this with the
//! exchange's actual holiday list. `WeekdayCalendar` is a reference
//! implementation (Mon-Fri, no holidays) sufficient for tests and the CLI.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

pub trait CalendarOracle: Send + Sync {
    fn is_trading_day(&self, date: NaiveDate) -> bool;

    fn trading_days_between(&self, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        let mut days = Vec::new();
        let mut cursor = from;
        while cursor <= to {
            if self.is_trading_day(cursor) {
                days.push(cursor);
            }
            cursor += Duration::days(1);
        }
        days
    }

    /// First trading day on or after `date`.
    fn first_trading_day_on_or_after(&self, date: NaiveDate) -> NaiveDate {
        let mut cursor = date;
        while !self.is_trading_day(cursor) {
            cursor += Duration::days(1);
        }
        cursor
    }

    /// Last trading day on or before `date`.
    fn last_trading_day_on_or_before(&self, date: NaiveDate) -> NaiveDate {
        let mut cursor = date;
        while !self.is_trading_day(cursor) {
            cursor -= Duration::days(1);
        }
        cursor
    }
}

/// Reference calendar: every Monday-Friday is a trading day, with an
/// optional explicit holiday exclusion list.
#[derive(Debug, Clone, Default)]
pub struct WeekdayCalendar {
    holidays: Vec<NaiveDate>,
}

impl WeekdayCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_holidays(holidays: Vec<NaiveDate>) -> Self {
        Self { holidays }
    }
}

impl CalendarOracle for WeekdayCalendar {
    fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }
}

/// First and last business day of the month containing `date`.
pub fn month_business_range(
    calendar: &dyn CalendarOracle,
    year: i32,
    month: u32,
) -> (NaiveDate, NaiveDate) {
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid year/month");
    let next_month_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("valid year/month");
    let last = next_month_first - Duration::days(1);
    (
        calendar.first_trading_day_on_or_after(first),
        calendar.last_trading_day_on_or_before(last),
    )
}

/// First and last business day of `year`.
pub fn year_business_range(calendar: &dyn CalendarOracle, year: i32) -> (NaiveDate, NaiveDate) {
    let first = NaiveDate::from_ymd_opt(year, 1, 1).expect("valid year");
    let last = NaiveDate::from_ymd_opt(year, 12, 31).expect("valid year");
    (
        calendar.first_trading_day_on_or_after(first),
        calendar.last_trading_day_on_or_before(last),
    )
}
