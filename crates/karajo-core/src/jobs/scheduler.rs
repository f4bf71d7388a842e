//! Calendar scheduler: parses expressions like `hourly@0,5,10` or
//! `daily@00:00,06:00` and computes the next UTC fire-time.
//!
//! Grammar: `<period>[@<list>][@HH:MM[,HH:MM...]]` where
//! `period ∈ {minutely, hourly, daily, weekly, monthly}`. For `hourly` the
//! (only) list is a comma-separated set of minutes-of-hour. For `daily` the
//! (only) list is a comma-separated set of `HH:MM` times. For `weekly` and
//! `monthly` the first list is weekday names / day-of-month numbers and the
//! optional second list is `HH:MM` times. `minutely` takes no list. All
//! times are UTC; ties resolve to the earliest strictly-future instant.

use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc, Weekday};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Period {
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarSchedule {
    raw: String,
    period: Period,
    /// hourly: minutes within the hour, sorted ascending, default [0].
    minutes_of_hour: Vec<u32>,
    /// weekly: weekdays the job fires on.
    weekdays: Vec<Weekday>,
    /// monthly: days-of-month the job fires on.
    days_of_month: Vec<u32>,
    /// daily/weekly/monthly: times of day, sorted ascending, default [(0,0)].
    times: Vec<(u32, u32)>,
}

impl CalendarSchedule {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn parse(expr: &str) -> Result<Self> {
        let raw = expr.trim().to_string();
        let mut parts = raw.split('@');
        let period_str = parts.next().unwrap_or("").trim();
        let period = match period_str {
            "minutely" => Period::Minutely,
            "hourly" => Period::Hourly,
            "daily" => Period::Daily,
            "weekly" => Period::Weekly,
            "monthly" => Period::Monthly,
            other => return Err(Error::config(format!("unknown schedule period: {other}"))),
        };

        let rest: Vec<&str> = parts.collect();

        let mut minutes_of_hour = Vec::new();
        let mut weekdays = Vec::new();
        let mut days_of_month = Vec::new();
        let mut times = Vec::new();

        match period {
            Period::Minutely => {
                if !rest.is_empty() {
                    return Err(Error::config("minutely schedules take no @ list"));
                }
            }
            Period::Hourly => {
                let list = rest.first().copied().unwrap_or("0");
                minutes_of_hour = parse_minute_list(list)?;
            }
            Period::Daily => {
                let list = rest.first().copied().unwrap_or("00:00");
                times = parse_time_list(list)?;
            }
            Period::Weekly => {
                let day_list = rest.first().copied().ok_or_else(|| {
                    Error::config("weekly schedule requires a weekday list")
                })?;
                weekdays = parse_weekday_list(day_list)?;
                times = match rest.get(1) {
                    Some(list) => parse_time_list(list)?,
                    None => vec![(0, 0)],
                };
            }
            Period::Monthly => {
                let day_list = rest.first().copied().ok_or_else(|| {
                    Error::config("monthly schedule requires a day-of-month list")
                })?;
                days_of_month = parse_day_of_month_list(day_list)?;
                times = match rest.get(1) {
                    Some(list) => parse_time_list(list)?,
                    None => vec![(0, 0)],
                };
            }
        }

        if minutes_of_hour.is_empty() && period == Period::Hourly {
            minutes_of_hour.push(0);
        }

        Ok(Self { raw, period, minutes_of_hour, weekdays, days_of_month, times })
    }

    /// Returns the earliest instant strictly after `now` at which this
    /// schedule fires.
    pub fn next_fire(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.period {
            Period::Minutely => {
                let base = now.with_second(0).unwrap().with_nanosecond(0).unwrap();
                base + Duration::minutes(1)
            }
            Period::Hourly => self.next_hourly(now),
            Period::Daily => self.next_daily(now),
            Period::Weekly => self.next_weekly(now),
            Period::Monthly => self.next_monthly(now),
        }
    }

    fn next_hourly(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let hour_start = now.date_naive().and_hms_opt(now.hour(), 0, 0).unwrap();
        for minute in &self.minutes_of_hour {
            let candidate = Utc.from_utc_datetime(&(hour_start + Duration::minutes(*minute as i64)));
            if candidate > now {
                return candidate;
            }
        }
        let next_hour_start = Utc.from_utc_datetime(&hour_start) + Duration::hours(1);
        let first_minute = *self.minutes_of_hour.iter().min().unwrap_or(&0);
        next_hour_start + Duration::minutes(first_minute as i64)
    }

    fn next_daily(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        for (h, m) in &self.times {
            if let Some(candidate) = at_time(today, *h, *m) {
                if candidate > now {
                    return candidate;
                }
            }
        }
        let (h, m) = self.times.first().copied().unwrap_or((0, 0));
        at_time(today + Duration::days(1), h, m).expect("valid time")
    }

    fn next_weekly(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut best: Option<DateTime<Utc>> = None;
        for day_offset in 0..8i64 {
            let day = now.date_naive() + Duration::days(day_offset);
            if !self.weekdays.contains(&day.weekday()) {
                continue;
            }
            for (h, m) in &self.times {
                if let Some(candidate) = at_time(day, *h, *m) {
                    if candidate > now && best.map(|b| candidate < b).unwrap_or(true) {
                        best = Some(candidate);
                    }
                }
            }
            if best.is_some() && day_offset > 0 {
                break;
            }
        }
        best.expect("weekly schedule always has a next fire within 8 days")
    }

    fn next_monthly(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut best: Option<DateTime<Utc>> = None;
        // 2 years of headroom comfortably covers any day-of-month/February edge case.
        for month_offset in 0..25i64 {
            let anchor = add_months(now.date_naive(), month_offset);
            for day in &self.days_of_month {
                let Some(day_date) = NaiveDate::from_ymd_opt(anchor.year(), anchor.month(), *day) else {
                    continue;
                };
                for (h, m) in &self.times {
                    if let Some(candidate) = at_time(day_date, *h, *m) {
                        if candidate > now && best.map(|b| candidate < b).unwrap_or(true) {
                            best = Some(candidate);
                        }
                    }
                }
            }
            if best.is_some() {
                break;
            }
        }
        best.expect("monthly schedule always has a next fire within 2 years")
    }
}

fn at_time(day: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    day.and_hms_opt(hour, minute, 0).map(|dt| Utc.from_utc_datetime(&dt))
}

fn add_months(day: NaiveDate, months: i64) -> NaiveDate {
    let total = day.year() as i64 * 12 + (day.month() as i64 - 1) + months;
    let year = (total.div_euclid(12)) as i32;
    let month = (total.rem_euclid(12)) as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, 1).expect("computed y/m is valid")
}

fn parse_minute_list(list: &str) -> Result<Vec<u32>> {
    let mut minutes: Vec<u32> = list
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .map_err(|_| Error::config(format!("invalid minute in schedule: {s}")))
        })
        .collect::<Result<Vec<u32>>>()?;
    for m in &minutes {
        if *m > 59 {
            return Err(Error::config(format!("minute out of range: {m}")));
        }
    }
    minutes.sort_unstable();
    minutes.dedup();
    Ok(minutes)
}

fn parse_time_list(list: &str) -> Result<Vec<(u32, u32)>> {
    let mut times: Vec<(u32, u32)> = list
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(parse_hhmm)
        .collect::<Result<Vec<(u32, u32)>>>()?;
    times.sort_unstable();
    times.dedup();
    Ok(times)
}

fn parse_hhmm(s: &str) -> Result<(u32, u32)> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| Error::config(format!("invalid HH:MM in schedule: {s}")))?;
    let h: u32 = h.parse().map_err(|_| Error::config(format!("invalid hour: {h}")))?;
    let m: u32 = m.parse().map_err(|_| Error::config(format!("invalid minute: {m}")))?;
    if h > 23 || m > 59 {
        return Err(Error::config(format!("time out of range: {s}")));
    }
    Ok((h, m))
}

fn parse_weekday_list(list: &str) -> Result<Vec<Weekday>> {
    list.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(parse_weekday)
        .collect()
}

fn parse_weekday(s: &str) -> Result<Weekday> {
    match s.to_ascii_lowercase().as_str() {
        "sun" | "sunday" => Ok(Weekday::Sun),
        "mon" | "monday" => Ok(Weekday::Mon),
        "tue" | "tues" | "tuesday" => Ok(Weekday::Tue),
        "wed" | "wednesday" => Ok(Weekday::Wed),
        "thu" | "thur" | "thursday" => Ok(Weekday::Thu),
        "fri" | "friday" => Ok(Weekday::Fri),
        "sat" | "saturday" => Ok(Weekday::Sat),
        other => Err(Error::config(format!("unknown weekday: {other}"))),
    }
}

fn parse_day_of_month_list(list: &str) -> Result<Vec<u32>> {
    let mut days: Vec<u32> = list
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .map_err(|_| Error::config(format!("invalid day-of-month: {s}")))
        })
        .collect::<Result<Vec<u32>>>()?;
    for d in &days {
        if *d == 0 || *d > 31 {
            return Err(Error::config(format!("day-of-month out of range: {d}")));
        }
    }
    days.sort_unstable();
    days.dedup();
    Ok(days)
}
