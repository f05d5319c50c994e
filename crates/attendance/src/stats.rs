//! Per-user attendance statistics.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;

use crate::session::{Session, TimeSlot};
use crate::weekday::portuguese_name;

const TOP_TIMES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeFrequency {
    pub time: TimeSlot,
    pub frequency: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayFrequency {
    pub day: &'static str,
    pub frequency: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct UserStats {
    pub total_classes: u32,
    pub classes_this_month: u32,
    pub upcoming_classes: u32,
    pub favorite_times: Vec<TimeFrequency>,
    pub favorite_days: Vec<DayFrequency>,
}

impl UserStats {
    /// Aggregate over the sessions a user currently has confirmed.
    ///
    /// Month and upcoming counts only consider dated sessions. Ties in the frequency
    /// lists break by time of day and by weekday (Sunday first).
    pub fn from_confirmed<'a>(
        sessions: impl IntoIterator<Item = &'a Session>,
        today: NaiveDate,
    ) -> Self {
        let mut stats = UserStats::default();
        let mut times: HashMap<TimeSlot, u32> = HashMap::new();
        let mut days: HashMap<Weekday, u32> = HashMap::new();

        for session in sessions {
            stats.total_classes += 1;
            if let Some(date) = session.date {
                if date.year() == today.year() && date.month() == today.month() {
                    stats.classes_this_month += 1;
                }
                if date >= today {
                    stats.upcoming_classes += 1;
                }
            }
            *times.entry(session.time).or_default() += 1;
            if let Some(day) = session.weekday() {
                *days.entry(day).or_default() += 1;
            }
        }

        let mut favorite_times: Vec<_> = times.into_iter().collect();
        favorite_times.sort_by(|(ta, fa), (tb, fb)| fb.cmp(fa).then(ta.cmp(tb)));
        stats.favorite_times = favorite_times
            .into_iter()
            .take(TOP_TIMES)
            .map(|(time, frequency)| TimeFrequency { time, frequency })
            .collect();

        let mut favorite_days: Vec<_> = days.into_iter().collect();
        favorite_days.sort_by(|(da, fa), (db, fb)| {
            fb.cmp(fa)
                .then(da.num_days_from_sunday().cmp(&db.num_days_from_sunday()))
        });
        stats.favorite_days = favorite_days
            .into_iter()
            .map(|(day, frequency)| DayFrequency {
                day: portuguese_name(day),
                frequency,
            })
            .collect();

        stats
    }
}
