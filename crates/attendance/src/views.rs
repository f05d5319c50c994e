//! Read models returned by the query layer.

use chrono::{DateTime, Utc};
use serde::Serialize;

use presenca_core::{DomainError, UserId};

use crate::session::Session;

/// Session plus its live confirmed-count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    #[serde(flatten)]
    pub session: Session,
    pub confirmed_count: u32,
}

impl SessionSummary {
    pub fn is_full(&self) -> bool {
        self.session.max_participants.is_reached_by(self.confirmed_count)
    }
}

/// Detail view. `is_full` is advisory; the write path re-checks capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub summary: SessionSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_confirmed: Option<bool>,
    pub is_full: bool,
}

impl SessionDetail {
    pub fn new(summary: SessionSummary, user_confirmed: Option<bool>) -> Self {
        let is_full = summary.is_full();
        Self {
            summary,
            user_confirmed,
            is_full,
        }
    }
}

/// A session the user currently holds a confirmed place in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmedSession {
    #[serde(flatten)]
    pub summary: SessionSummary,
    pub confirmed_at: DateTime<Utc>,
}

/// A confirmed participant as shown in a roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    #[serde(rename = "id")]
    pub user_id: UserId,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub confirmed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    #[default]
    All,
    Confirmed,
    Cancelled,
}

impl HistoryStatus {
    pub fn matches(self, confirmed: bool) -> bool {
        match self {
            HistoryStatus::All => true,
            HistoryStatus::Confirmed => confirmed,
            HistoryStatus::Cancelled => !confirmed,
        }
    }
}

impl core::str::FromStr for HistoryStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(DomainError::validation(format!(
                "status must be one of: all, confirmed, cancelled (got '{other}')"
            ))),
        }
    }
}

/// One session in a user's attendance history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub class: Session,
    pub confirmed: bool,
    pub confirmed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Most recent session first; undated sessions sort last.
    pub fn newest_first(a: &Self, b: &Self) -> core::cmp::Ordering {
        let key = |e: &Self| {
            let class = &e.class;
            (class.date.is_some(), class.date, class.weekday_ordinal(), class.time)
        };
        key(b).cmp(&key(a)).then_with(|| a.class.id.cmp(&b.class.id))
    }
}
