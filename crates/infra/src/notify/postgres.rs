use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use super::{AttendanceNotice, Notifier, NotifyError};

/// Writes notices to the `notifications` table.
#[derive(Debug, Clone)]
pub struct PostgresNotifier {
    pool: PgPool,
}

impl PostgresNotifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Notifier for PostgresNotifier {
    #[instrument(skip(self, notice), fields(user_id = %notice.user_id, kind = notice.kind()), err)]
    async fn notify(&self, notice: &AttendanceNotice) -> Result<(), NotifyError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, type, title, message, data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(notice.user_id.as_uuid())
        .bind(notice.kind())
        .bind(notice.title())
        .bind(notice.message())
        .bind(notice.data())
        .bind(notice.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        Ok(())
    }
}
