//! Best-effort attendance notifications.
//!
//! A notice is produced only after a confirmation change has committed. Delivery failures
//! are logged by the caller and never affect the confirmation result.

mod postgres;

use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use presenca_attendance::{Session, SetAttendance, TimeSlot};
use presenca_core::{SessionId, UserId};

pub use postgres::PostgresNotifier;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// The class a notice refers to, read right after the change committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoticeClass {
    pub title: Option<String>,
    pub day: String,
    pub date: Option<NaiveDate>,
    pub time: TimeSlot,
}

impl From<&Session> for NoticeClass {
    fn from(session: &Session) -> Self {
        Self {
            title: session.title.clone(),
            day: session.day.clone(),
            date: session.date,
            time: session.time,
        }
    }
}

impl NoticeClass {
    /// Title when set, otherwise the slot ("Segunda 18:30").
    fn label(&self) -> String {
        match &self.title {
            Some(title) if !title.trim().is_empty() => title.clone(),
            _ => format!("{} {}", self.day, self.time),
        }
    }
}

/// Notification about the caller's own confirmation change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceNotice {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub confirmed: bool,
    pub occurred_at: DateTime<Utc>,
    pub class: NoticeClass,
}

impl AttendanceNotice {
    /// Notice for a command that changed the caller's state on `session`.
    pub fn for_change(cmd: &SetAttendance, session: &Session) -> Self {
        Self {
            user_id: cmd.user_id,
            session_id: cmd.session_id,
            confirmed: cmd.confirmed,
            occurred_at: cmd.requested_at,
            class: NoticeClass::from(session),
        }
    }

    pub fn kind(&self) -> &'static str {
        if self.confirmed {
            "class_confirmed"
        } else {
            "class_cancelled"
        }
    }

    fn action(&self) -> &'static str {
        if self.confirmed {
            "confirmada"
        } else {
            "cancelada"
        }
    }

    pub fn title(&self) -> String {
        format!("Presença {}", self.action())
    }

    pub fn message(&self) -> String {
        format!(
            "Sua presença na aula \"{}\" foi {}",
            self.class.label(),
            self.action()
        )
    }

    pub fn data(&self) -> serde_json::Value {
        json!({
            "class_id": self.session_id,
            "confirmed": self.confirmed,
            "date": self.class.date,
            "time": self.class.time,
        })
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &AttendanceNotice) -> Result<(), NotifyError>;
}

/// Keeps every notice in memory (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    sent: Mutex<Vec<AttendanceNotice>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<AttendanceNotice> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notice: &AttendanceNotice) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .map_err(|_| NotifyError::Delivery("notifier lock poisoned".to_string()))?
            .push(notice.clone());
        Ok(())
    }
}

/// Emits notices as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &AttendanceNotice) -> Result<(), NotifyError> {
        tracing::info!(
            user_id = %notice.user_id,
            session_id = %notice.session_id,
            kind = notice.kind(),
            "attendance notification"
        );
        Ok(())
    }
}
