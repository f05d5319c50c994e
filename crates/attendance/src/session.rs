use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use presenca_core::{DomainError, DomainResult, Entity, SessionId, ValueObject};

use crate::weekday::parse_weekday;

/// Maximum number of confirmed participants for a session (always > 0).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Capacity(u32);

impl Capacity {
    pub fn new(value: u32) -> DomainResult<Self> {
        if value == 0 {
            return Err(DomainError::validation("max_participants must be greater than zero"));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Whether `confirmed` participants already exhaust this capacity.
    pub fn is_reached_by(self, confirmed: u32) -> bool {
        confirmed >= self.0
    }
}

impl TryFrom<u32> for Capacity {
    type Error = DomainError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Capacity> for u32 {
    fn from(value: Capacity) -> Self {
        value.0
    }
}

impl ValueObject for Capacity {}

/// Time of day a session starts, normalized to `HH:MM`.
///
/// Accepts the spellings found in schedules: `8:30`, `08:30`, `20h`, `20h30`, `20`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeSlot {
    hour: u8,
    minute: u8,
}

impl TimeSlot {
    pub fn new(hour: u8, minute: u8) -> DomainResult<Self> {
        if hour > 23 || minute > 59 {
            return Err(DomainError::validation(format!(
                "time out of range: {hour}:{minute:02}"
            )));
        }
        Ok(Self { hour, minute })
    }

    pub fn parse(raw: &str) -> DomainResult<Self> {
        let s = raw.trim().to_lowercase();
        let (h, m) = match s.split_once([':', 'h']) {
            Some((h, m)) => (h, m),
            None => (s.as_str(), ""),
        };
        // Postgres TIME renders as HH:MM:SS; seconds are not meaningful here.
        let m = m.split(':').next().unwrap_or("");

        let invalid = || DomainError::validation(format!("invalid time: '{raw}'"));
        let hour: u8 = h.trim().parse().map_err(|_| invalid())?;
        let minute: u8 = if m.trim().is_empty() {
            0
        } else {
            m.trim().parse().map_err(|_| invalid())?
        };
        Self::new(hour, minute)
    }

    pub fn hour(self) -> u8 {
        self.hour
    }

    pub fn minute(self) -> u8 {
        self.minute
    }

    pub fn minutes_of_day(self) -> u32 {
        u32::from(self.hour) * 60 + u32::from(self.minute)
    }
}

impl core::fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl core::str::FromStr for TimeSlot {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for TimeSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeSlot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl ValueObject for TimeSlot {}

const UNKNOWN_WEEKDAY: u8 = 7;

/// A scheduled class session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Weekday label as authored (e.g. "Segunda").
    pub day: String,
    pub time: TimeSlot,
    pub date: Option<NaiveDate>,
    pub location: String,
    pub instructor: String,
    pub max_participants: Capacity,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Weekday of the session: the concrete date wins over the label.
    pub fn weekday(&self) -> Option<Weekday> {
        self.date
            .map(|d| d.weekday())
            .or_else(|| parse_weekday(&self.day))
    }

    /// Monday = 0 .. Sunday = 6; 7 when the label is not a weekday.
    pub fn weekday_ordinal(&self) -> u8 {
        self.weekday()
            .map_or(UNKNOWN_WEEKDAY, |d| d.num_days_from_monday() as u8)
    }

    /// Ordering key for schedule listings: dated sessions first by date, then weekday,
    /// time and id. Stores must order the same way so pages agree across backends.
    pub fn schedule_key(&self) -> (bool, Option<NaiveDate>, u8, TimeSlot, SessionId) {
        (
            self.date.is_none(),
            self.date,
            self.weekday_ordinal(),
            self.time,
            self.id,
        )
    }
}

impl Entity for Session {
    type Id = SessionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Input for creating a session (administrative seeding).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewSession {
    pub title: Option<String>,
    pub description: Option<String>,
    pub day: String,
    pub time: String,
    pub date: Option<NaiveDate>,
    pub location: String,
    pub instructor: String,
    pub max_participants: u32,
}

impl NewSession {
    pub fn validate(self, id: SessionId, created_at: DateTime<Utc>) -> DomainResult<Session> {
        if self.day.trim().is_empty() {
            return Err(DomainError::validation("day cannot be empty"));
        }
        if let Some(date) = self.date {
            match parse_weekday(&self.day) {
                Some(day) if day != date.weekday() => {
                    return Err(DomainError::validation(format!(
                        "day '{}' does not match date {date}",
                        self.day
                    )));
                }
                _ => {}
            }
        }
        if self.location.trim().is_empty() {
            return Err(DomainError::validation("location cannot be empty"));
        }
        if self.instructor.trim().is_empty() {
            return Err(DomainError::validation("instructor cannot be empty"));
        }

        Ok(Session {
            id,
            title: self.title,
            description: self.description,
            day: self.day.trim().to_string(),
            time: TimeSlot::parse(&self.time)?,
            date: self.date,
            location: self.location.trim().to_string(),
            instructor: self.instructor.trim().to_string(),
            max_participants: Capacity::new(self.max_participants)?,
            created_at,
        })
    }
}
