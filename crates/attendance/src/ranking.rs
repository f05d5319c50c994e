//! "Next class" ranking by user schedule preferences.
//!
//! Pure presentation logic: takes a list of sessions and a preference set, returns
//! them ordered by how soon they start, with preferred weekdays and time slots pulled
//! to the front.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};
use serde::Serialize;

use crate::session::TimeSlot;
use crate::views::SessionSummary;
use crate::weekday::parse_weekday;

/// Minutes subtracted per matched preference; larger than any weekly distance.
const PREFERENCE_WEIGHT: i64 = 1_000_000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulePreferences {
    pub days: Vec<Weekday>,
    pub times: Vec<TimeSlot>,
}

impl SchedulePreferences {
    /// Build from free-form labels; unparseable entries are dropped.
    pub fn from_labels<D, T>(days: D, times: T) -> Self
    where
        D: IntoIterator,
        D::Item: AsRef<str>,
        T: IntoIterator,
        T::Item: AsRef<str>,
    {
        Self {
            days: days
                .into_iter()
                .filter_map(|d| parse_weekday(d.as_ref()))
                .collect(),
            times: times
                .into_iter()
                .filter_map(|t| TimeSlot::parse(t.as_ref()).ok())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty() && self.times.is_empty()
    }

    fn day_matches(&self, day: Weekday) -> bool {
        self.days.contains(&day)
    }

    fn time_matches(&self, time: TimeSlot) -> bool {
        self.times.contains(&time)
    }

    /// A session is relevant when it satisfies every preference kind that was given.
    fn is_relevant(&self, day: Weekday, time: TimeSlot) -> bool {
        (self.days.is_empty() || self.day_matches(day))
            && (self.times.is_empty() || self.time_matches(time))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedSession {
    #[serde(flatten)]
    pub summary: SessionSummary,
    pub next_date: NaiveDate,
    pub starts_in_minutes: i64,
    pub is_preferred_day: bool,
    pub is_preferred_time: bool,
}

/// Next occurrence of a session strictly after `now`.
///
/// Dated sessions occur once; undated ones repeat weekly on their weekday label, and a
/// slot that already started today rolls over to next week.
fn next_occurrence(summary: &SessionSummary, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let session = &summary.session;
    let time = chrono::NaiveTime::from_hms_opt(
        u32::from(session.time.hour()),
        u32::from(session.time.minute()),
        0,
    )?;

    if let Some(date) = session.date {
        let at = date.and_time(time);
        return (at > now).then_some(at);
    }

    let day = session.weekday()?;
    let today = now.date();
    let mut days_ahead = i64::from(day.num_days_from_sunday())
        - i64::from(today.weekday().num_days_from_sunday());
    if days_ahead < 0 || (days_ahead == 0 && time <= now.time()) {
        days_ahead += 7;
    }
    Some((today + Duration::days(days_ahead)).and_time(time))
}

/// Rank sessions for the "next class" view.
///
/// When preferences are given, only sessions matching them are considered, unless none
/// match, in which case every session is. Sessions with no upcoming occurrence are
/// dropped.
pub fn rank_next_sessions(
    sessions: impl IntoIterator<Item = SessionSummary>,
    preferences: &SchedulePreferences,
    now: NaiveDateTime,
) -> Vec<RankedSession> {
    let mut candidates: Vec<RankedSession> = sessions
        .into_iter()
        .filter_map(|summary| {
            let at = next_occurrence(&summary, now)?;
            let day = at.date().weekday();
            let time = summary.session.time;
            Some(RankedSession {
                next_date: at.date(),
                starts_in_minutes: (at - now).num_minutes(),
                is_preferred_day: preferences.day_matches(day),
                is_preferred_time: preferences.time_matches(time),
                summary,
            })
        })
        .collect();

    if !preferences.is_empty() {
        let any_relevant = candidates
            .iter()
            .any(|c| preferences.is_relevant(c.next_date.weekday(), c.summary.session.time));
        if any_relevant {
            candidates
                .retain(|c| preferences.is_relevant(c.next_date.weekday(), c.summary.session.time));
        }
    }

    let adjusted = |c: &RankedSession| {
        c.starts_in_minutes
            - PREFERENCE_WEIGHT * i64::from(c.is_preferred_day)
            - PREFERENCE_WEIGHT * i64::from(c.is_preferred_time)
    };
    candidates.sort_by(|a, b| {
        adjusted(a)
            .cmp(&adjusted(b))
            .then(a.starts_in_minutes.cmp(&b.starts_in_minutes))
    });
    candidates
}
