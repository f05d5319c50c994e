//! Confirmation service: the only entry point that changes attendance.
//!
//! ```text
//! SetAttendance
//!   ↓
//! 1. ledger.set_attendance (one serialized unit of work per attempt)
//!   ↓  transient failure → backoff, retry the whole unit of work
//! 2. outcome.changed? → spawn notification (best effort; class details are read
//!    after commit)
//!   ↓
//! AttendanceOutcome
//! ```
//!
//! Business rejections (`NotFound`, `ClassFull`, validation) are returned on the first
//! attempt. Only the attempt that commits can trigger a notification, and only when it
//! changed the stored state.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::instrument;

use presenca_attendance::{AttendanceOutcome, SetAttendance};
use presenca_core::{DomainError, SessionId, UserId};

use crate::config::RetryPolicy;
use crate::notify::{AttendanceNotice, Notifier};
use crate::store::{ConfirmationLedger, ScheduleQueries, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("class is full ({capacity} participants)")]
    ClassFull { capacity: u32 },

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Transient failures persisted through every retry. Nothing was written.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                ServiceError::Validation(msg)
            }
            DomainError::InvariantViolation(msg) => ServiceError::Internal(msg),
            DomainError::NotFound => ServiceError::NotFound,
            DomainError::ClassFull { capacity } => ServiceError::ClassFull { capacity },
            DomainError::Unauthorized => ServiceError::Forbidden("unauthorized".to_string()),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound => ServiceError::NotFound,
            StoreError::Domain(e) => e.into(),
            e @ StoreError::Transient { .. } => ServiceError::Unavailable(e.to_string()),
            e @ StoreError::Internal { .. } => ServiceError::Internal(e.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct ConfirmationService {
    ledger: Arc<dyn ConfirmationLedger>,
    sessions: Arc<dyn ScheduleQueries>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ConfirmationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationService")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ConfirmationService {
    pub fn new(
        ledger: Arc<dyn ConfirmationLedger>,
        sessions: Arc<dyn ScheduleQueries>,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            sessions,
            notifier,
            retry,
        }
    }

    pub async fn confirm(
        &self,
        user_id: UserId,
        session_id: SessionId,
    ) -> Result<AttendanceOutcome, ServiceError> {
        self.set_attendance(user_id, session_id, true).await
    }

    pub async fn cancel(
        &self,
        user_id: UserId,
        session_id: SessionId,
    ) -> Result<AttendanceOutcome, ServiceError> {
        self.set_attendance(user_id, session_id, false).await
    }

    /// Set `user_id`'s attendance for `session_id` to `confirmed`.
    #[instrument(skip(self), fields(user_id = %user_id, session_id = %session_id), err)]
    pub async fn set_attendance(
        &self,
        user_id: UserId,
        session_id: SessionId,
        confirmed: bool,
    ) -> Result<AttendanceOutcome, ServiceError> {
        let cmd = SetAttendance {
            session_id,
            user_id,
            confirmed,
            requested_at: Utc::now(),
        };

        let outcome = self.apply_with_retry(&cmd).await?;

        if outcome.changed {
            tracing::info!(
                confirmed = outcome.confirmed,
                confirmed_count = outcome.confirmed_count,
                "attendance changed"
            );
            self.spawn_notification(cmd);
        }
        Ok(outcome)
    }

    async fn apply_with_retry(&self, cmd: &SetAttendance) -> Result<AttendanceOutcome, StoreError> {
        let max_retries = self.retry.max_retries;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            match self.ledger.set_attendance(cmd).await {
                Ok(outcome) => {
                    if attempt > 0 {
                        tracing::info!("set_attendance succeeded after {} retries", attempt);
                    }
                    return Ok(outcome);
                }
                Err(e) if e.is_transient() => {
                    if attempt < max_retries {
                        let delay = self.retry.backoff(attempt);
                        tracing::warn!(
                            error = %e,
                            "set_attendance attempt {} failed, retrying in {:?}",
                            attempt + 1,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        tracing::error!(
                            error = %e,
                            "set_attendance failed after {} retries",
                            max_retries
                        );
                    }
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| StoreError::internal("set_attendance", "no attempt was made")))
    }

    fn spawn_notification(&self, cmd: SetAttendance) {
        let sessions = Arc::clone(&self.sessions);
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            let session = match sessions.session_detail(cmd.session_id, None).await {
                Ok(detail) => detail.summary.session,
                Err(e) => {
                    tracing::warn!(
                        user_id = %cmd.user_id,
                        session_id = %cmd.session_id,
                        error = %e,
                        "class lookup failed; attendance notification skipped"
                    );
                    return;
                }
            };
            let notice = AttendanceNotice::for_change(&cmd, &session);
            if let Err(e) = notifier.notify(&notice).await {
                tracing::warn!(
                    user_id = %notice.user_id,
                    session_id = %notice.session_id,
                    error = %e,
                    "failed to deliver attendance notification"
                );
            }
        });
    }
}
