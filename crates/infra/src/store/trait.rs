use chrono::NaiveDate;
use thiserror::Error;

use presenca_attendance::{
    AttendanceOutcome, ConfirmedSession, HistoryEntry, HistoryStatus, Participant, Session,
    SessionDetail, SessionSummary, SetAttendance, UserProfile, UserStats,
};
use presenca_core::{DomainError, SessionId, UserId};

use super::query::{Page, PageRequest, SessionFilter};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Lock conflicts, timeouts, dropped connections. The unit of work was rolled back
    /// and may be retried as a whole.
    #[error("transient failure in {operation}: {message}")]
    Transient {
        operation: &'static str,
        message: String,
    },

    #[error("not found")]
    NotFound,

    /// Business rule rejection (capacity, validation) decided inside the unit of work.
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("store failure in {operation}: {message}")]
    Internal {
        operation: &'static str,
        message: String,
    },
}

impl StoreError {
    pub fn transient(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Transient {
            operation,
            message: message.into(),
        }
    }

    pub fn internal(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Internal {
            operation,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }
}

/// Write path: the only component allowed to mutate confirmation records.
///
/// Implementations must run the capacity check and the write in one unit of work that
/// is serialized against other writers on the same session, and must leave no trace
/// when they return an error.
#[async_trait::async_trait]
pub trait ConfirmationLedger: Send + Sync {
    async fn set_attendance(&self, cmd: &SetAttendance) -> Result<AttendanceOutcome, StoreError>;
}

/// Read paths. Counts are computed live from confirmation records.
#[async_trait::async_trait]
pub trait ScheduleQueries: Send + Sync {
    /// Sessions ordered by date then time.
    async fn list_sessions(
        &self,
        filter: &SessionFilter,
        page: PageRequest,
    ) -> Result<Page<SessionSummary>, StoreError>;

    /// Every session with its count (schedule views, next-class ranking).
    async fn all_sessions(&self) -> Result<Vec<SessionSummary>, StoreError>;

    /// `NotFound` when the session does not exist.
    async fn session_detail(
        &self,
        session_id: SessionId,
        viewer: Option<UserId>,
    ) -> Result<SessionDetail, StoreError>;

    /// Confirmed participants, earliest confirmation first. Unknown sessions yield an
    /// empty roster.
    async fn participants(&self, session_id: SessionId) -> Result<Vec<Participant>, StoreError>;

    async fn confirmed_sessions(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> Result<Page<ConfirmedSession>, StoreError>;

    /// History ordered by session date/time, newest first.
    async fn user_history(
        &self,
        user_id: UserId,
        status: HistoryStatus,
        page: PageRequest,
    ) -> Result<Page<HistoryEntry>, StoreError>;

    async fn user_stats(&self, user_id: UserId, today: NaiveDate) -> Result<UserStats, StoreError>;

    async fn profile(&self, user_id: UserId) -> Result<Option<UserProfile>, StoreError>;
}

/// Administrative writes used for seeding and tests.
#[async_trait::async_trait]
pub trait SessionCatalog: Send + Sync {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError>;

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StoreError>;
}
