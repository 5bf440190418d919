use log::LevelFilter;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use time::{
    format_description::{self, FormatItem},
    Date, OffsetDateTime,
};

pub const SECONDS_TO_DAYS: i64 = 24 * 60 * 60;

pub static DATE_FORMAT: Lazy<Vec<FormatItem<'static>>> =
    Lazy::new(|| format_description::parse("[year]-[month]-[day]").expect("Invalid date format"));

/// Days since the Unix epoch, the storage representation of a calendar date.
#[inline]
pub fn date_to_day(date: Date) -> i64 {
    date.midnight().assume_utc().unix_timestamp() / SECONDS_TO_DAYS
}

#[inline]
pub fn day_to_date(day: i64) -> anyhow::Result<Date> {
    Ok(OffsetDateTime::from_unix_timestamp(day * SECONDS_TO_DAYS)?.date())
}

#[derive(Serialize, Deserialize)]
#[serde(remote = "LevelFilter")]
pub enum SerdeLevelFilter {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}
