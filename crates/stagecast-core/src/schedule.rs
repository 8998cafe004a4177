//! Weekly playback schedule
//!
//! A schedule is a weekly grid of `(day, HH:MM)` fire points built from
//! rules, with per-date exceptions. Evaluation here is pure over calendar
//! values; the scheduler task in `stagecast-player` supplies wall-clock time
//! and fires the triggers.

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Scheduling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    /// Manual control only, never fires
    #[default]
    Manual,
    /// Fires once immediately on (re)configuration
    Continuous,
    /// Follows the weekly rule grid
    Scheduled,
}

/// A weekly repeating rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRule {
    pub id: String,
    /// Lowercase day names: mon, tue, wed, thu, fri, sat, sun
    pub days: Vec<String>,
    /// HH:MM, local time
    pub times: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// A per-date override; empty `times` suppresses the whole date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleException {
    /// YYYY-MM-DD, local calendar day
    pub date: String,
    #[serde(default)]
    pub times: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

/// Complete schedule configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: ScheduleMode,
    #[serde(default)]
    pub rules: Vec<ScheduleRule>,
    #[serde(default)]
    pub exceptions: Vec<ScheduleException>,
}

fn default_true() -> bool {
    true
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: ScheduleMode::Manual,
            rules: Vec::new(),
            exceptions: Vec::new(),
        }
    }
}

/// Parse a day name by its three-letter prefix, case-insensitive.
pub fn parse_day(name: &str) -> Option<Weekday> {
    match name.to_ascii_lowercase().get(..3)? {
        "mon" => Some(Weekday::Mon),
        "tue" => Some(Weekday::Tue),
        "wed" => Some(Weekday::Wed),
        "thu" => Some(Weekday::Thu),
        "fri" => Some(Weekday::Fri),
        "sat" => Some(Weekday::Sat),
        "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Parse a HH:MM fire time.
pub fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M").ok()
}

impl Schedule {
    /// Effective fire times for one calendar date.
    ///
    /// An exception for the date replaces the rule grid entirely; an
    /// exception with no times suppresses the date. Only `scheduled` mode on
    /// an enabled schedule ever yields times.
    pub fn times_on(&self, date: NaiveDate) -> Vec<NaiveTime> {
        if !self.enabled || self.mode != ScheduleMode::Scheduled {
            return Vec::new();
        }

        let iso = date.format("%Y-%m-%d").to_string();
        if let Some(exception) = self.exceptions.iter().find(|e| e.date == iso) {
            let mut times: Vec<NaiveTime> =
                exception.times.iter().filter_map(|t| parse_time(t)).collect();
            times.sort();
            times.dedup();
            return times;
        }

        let weekday = date.weekday();
        let mut times: Vec<NaiveTime> = self
            .rules
            .iter()
            .filter(|rule| rule.enabled)
            .filter(|rule| rule.days.iter().filter_map(|d| parse_day(d)).any(|d| d == weekday))
            .flat_map(|rule| rule.times.iter().filter_map(|t| parse_time(t)))
            .collect();
        times.sort();
        times.dedup();
        times
    }

    /// Earliest fire strictly after `after`, scanning `horizon_days` ahead.
    ///
    /// A full week plus one day covers every weekly rule; longer horizons
    /// only matter for exception-heavy schedules.
    pub fn next_fire_after(
        &self,
        after: NaiveDateTime,
        horizon_days: u64,
    ) -> Option<NaiveDateTime> {
        for offset in 0..=horizon_days {
            let date = after.date().checked_add_days(Days::new(offset))?;
            for time in self.times_on(date) {
                let fire = date.and_time(time);
                if fire > after {
                    return Some(fire);
                }
            }
        }
        None
    }

    /// Check every day/time/date in the schedule parses.
    pub fn validate(&self) -> Result<()> {
        for rule in &self.rules {
            for day in &rule.days {
                if parse_day(day).is_none() {
                    return Err(CoreError::InvalidSchedule(format!(
                        "rule {}: unknown day {day:?}",
                        rule.id
                    )));
                }
            }
            for time in &rule.times {
                if parse_time(time).is_none() {
                    return Err(CoreError::InvalidSchedule(format!(
                        "rule {}: bad time {time:?}",
                        rule.id
                    )));
                }
            }
        }
        for exception in &self.exceptions {
            if NaiveDate::parse_from_str(&exception.date, "%Y-%m-%d").is_err() {
                return Err(CoreError::InvalidSchedule(format!(
                    "exception date {:?} is not YYYY-MM-DD",
                    exception.date
                )));
            }
            for time in &exception.times {
                if parse_time(time).is_none() {
                    return Err(CoreError::InvalidSchedule(format!(
                        "exception {}: bad time {time:?}",
                        exception.date
                    )));
                }
            }
        }
        Ok(())
    }
}
