// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};

/// The same as `NaiveDate::from_ymd(1970, 1, 1).num_days_from_ce()`.
/// Minus this magic number to store the number of days since 1970-01-01.
pub const UNIX_EPOCH_DAYS: i32 = 719_163;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Days since 1970-01-01.
pub fn date_to_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS
}

/// Microseconds since 1970-01-01 00:00:00 UTC.
pub fn datetime_to_micros(datetime: NaiveDateTime) -> i64 {
    datetime.and_utc().timestamp_micros()
}

pub fn format_date(days: i32) -> String {
    match NaiveDate::from_num_days_from_ce_opt(days.saturating_add(UNIX_EPOCH_DAYS)) {
        Some(date) => date.format(DATE_FORMAT).to_string(),
        None => days.to_string(),
    }
}

pub fn format_datetime(micros: i64) -> String {
    match DateTime::from_timestamp_micros(micros) {
        Some(datetime) => datetime.naive_utc().format(DATETIME_FORMAT).to_string(),
        None => micros.to_string(),
    }
}
