//! Aggregation over committed records
//!
//! Day boundaries are local calendar days. Every function has a `_in`
//! variant taking an explicit time zone; the plain ones use the system zone.

use crate::models::FoodRecord;
use chrono::{DateTime, Days, FixedOffset, Local, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct DailyTotals {
    pub calories: u64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

/// Calories for one calendar day of a series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayCalories {
    pub day: NaiveDate,
    /// Local midnight that opens `day`
    pub day_start: DateTime<FixedOffset>,
    pub calories: u64,
}

pub fn daily_totals(records: &[FoodRecord], day: NaiveDate) -> DailyTotals {
    daily_totals_in(records, day, &Local)
}

pub fn daily_totals_in<Tz: TimeZone>(records: &[FoodRecord], day: NaiveDate, tz: &Tz) -> DailyTotals {
    sum_where(records, |r| r.timestamp.with_timezone(tz).date_naive() == day)
}

/// Combined totals over the most recent `days` calendar days ending today.
/// Zero days is an empty window.
pub fn period_totals(records: &[FoodRecord], days: u32) -> DailyTotals {
    period_totals_in(records, days, Local::now().date_naive(), &Local)
}

pub fn period_totals_in<Tz: TimeZone>(
    records: &[FoodRecord],
    days: u32,
    today: NaiveDate,
    tz: &Tz,
) -> DailyTotals {
    let Some(first) = days
        .checked_sub(1)
        .and_then(|back| today.checked_sub_days(Days::new(u64::from(back))))
    else {
        return DailyTotals::default();
    };

    sum_where(records, |r| {
        let day = r.timestamp.with_timezone(tz).date_naive();
        first <= day && day <= today
    })
}

fn sum_where<P>(records: &[FoodRecord], keep: P) -> DailyTotals
where
    P: Fn(&FoodRecord) -> bool,
{
    records
        .iter()
        .filter(|r| keep(r))
        .fold(DailyTotals::default(), |mut totals, r| {
            totals.calories += u64::from(r.calories);
            totals.protein += r.protein;
            totals.carbs += r.carbs;
            totals.fat += r.fat;
            totals
        })
}

/// Totals for the current local day
pub fn today_totals(records: &[FoodRecord]) -> DailyTotals {
    daily_totals(records, Local::now().date_naive())
}

/// The most recent `days` calendar days ending today, oldest first. Days
/// without records are present with zero calories.
pub fn series(records: &[FoodRecord], days: u32) -> Vec<DayCalories> {
    series_in(records, days, Local::now().date_naive(), &Local)
}

pub fn series_in<Tz: TimeZone>(
    records: &[FoodRecord],
    days: u32,
    today: NaiveDate,
    tz: &Tz,
) -> Vec<DayCalories> {
    (0..days)
        .rev()
        .filter_map(|offset| today.checked_sub_days(Days::new(u64::from(offset))))
        .map(|day| DayCalories {
            day,
            day_start: local_midnight(day, tz),
            calories: daily_totals_in(records, day, tz).calories,
        })
        .collect()
}

/// Earliest instant of `day` in `tz`. Zones that skip midnight start the day
/// at the first valid hour.
fn local_midnight<Tz: TimeZone>(day: NaiveDate, tz: &Tz) -> DateTime<FixedOffset> {
    (0..24)
        .filter_map(|hour| day.and_hms_opt(hour, 0, 0))
        .find_map(|naive| tz.from_local_datetime(&naive).earliest())
        .map(|start| start.fixed_offset())
        .unwrap_or_else(|| day.and_time(chrono::NaiveTime::MIN).and_utc().fixed_offset())
}
