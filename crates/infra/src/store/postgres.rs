//! Postgres-backed session store and confirmation ledger.
//!
//! ## Write path
//!
//! `set_attendance` runs in one transaction:
//!
//! 1. `SET LOCAL statement_timeout` so a stuck statement aborts the whole transaction
//! 2. `SELECT ... FROM classes WHERE id = $1 FOR UPDATE` (re-reads capacity and
//!    serializes writers on that class; other classes are unaffected)
//! 3. load the caller's confirmation row and the live confirmed count
//! 4. let [`SessionRoster`] decide
//! 5. upsert the confirmation row and commit
//!
//! Any error before commit drops the transaction, which rolls it back.
//!
//! ## Error Mapping
//!
//! | SQLx error | SQLSTATE | StoreError |
//! |------------|----------|------------|
//! | serialization failure / deadlock | `40001` / `40P01` | `Transient` |
//! | lock not available / query canceled (timeout) | `55P03` / `57014` | `Transient` |
//! | foreign key violation | `23503` | `NotFound` |
//! | check violation | `23514` | `Domain(Validation)` |
//! | pool timeout, I/O | n/a | `Transient` |
//! | anything else | n/a | `Internal` |

use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{FromRow, Postgres, Row, Transaction};
use tracing::{instrument, Span};
use uuid::Uuid;

use presenca_attendance::{
    AttendanceOutcome, Capacity, Confirmation, ConfirmedSession, HistoryEntry, HistoryStatus,
    Participant, Session, SessionDetail, SessionRoster, SessionSummary, SetAttendance, TimeSlot,
    UserProfile, UserStats,
};
use presenca_core::{execute, DomainError, SessionId, UserId};

use super::query::{Page, PageRequest, SessionFilter};
use super::r#trait::{ConfirmationLedger, ScheduleQueries, SessionCatalog, StoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_schema.sql");

/// Confirmed participants of the class aliased as `c`.
///
/// Every read path and the write path count through this expression.
macro_rules! confirmed_count {
    ($class_id:literal) => {
        concat!(
            "(SELECT COUNT(*) FROM class_confirmations cc_count ",
            "WHERE cc_count.class_id = ",
            $class_id,
            " AND cc_count.confirmed)"
        )
    };
}

macro_rules! session_columns {
    () => {
        concat!(
            "c.id, c.title, c.description, c.day, c.time, c.date, c.location, ",
            "c.instructor, c.max_participants, c.created_at, ",
            confirmed_count!("c.id"),
            " AS confirmed_count"
        )
    };
}

/// Inclusive date window; undated classes only pass when both bounds are NULL.
macro_rules! date_window {
    () => {
        concat!(
            "(($1::date IS NULL AND $2::date IS NULL) OR (c.date IS NOT NULL ",
            "AND ($1::date IS NULL OR c.date >= $1::date) ",
            "AND ($2::date IS NULL OR c.date <= $2::date)))"
        )
    };
}

/// Pool settings for [`PostgresStore::connect`].
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PostgresStore {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    pub async fn connect(options: &PostgresOptions) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect(&options.url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, options.statement_timeout))
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SELECT set_config('statement_timeout', $1, true)")
            .bind(format!("{}ms", self.statement_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("statement_timeout", e))?;
        Ok(tx)
    }

    async fn confirmed_rows(
        &self,
        user_id: UserId,
        page: Option<PageRequest>,
    ) -> Result<Vec<ConfirmedSession>, StoreError> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            session_columns!(),
            ", cc.confirmed_at AS member_confirmed_at ",
            "FROM class_confirmations cc JOIN classes c ON c.id = cc.class_id ",
            "WHERE cc.user_id = $1 AND cc.confirmed ",
            "ORDER BY c.date ASC NULLS LAST, c.weekday ASC, c.time ASC, c.id ASC ",
            "LIMIT $2 OFFSET $3"
        ))
        .bind(user_id.as_uuid())
        .bind(page.map(|p| i64::from(p.limit())))
        .bind(page.map(|p| p.offset() as i64).unwrap_or(0))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("confirmed_sessions", e))?;

        rows.iter()
            .map(|row| {
                Ok(ConfirmedSession {
                    summary: summary_from_row(row)?,
                    confirmed_at: row
                        .try_get("member_confirmed_at")
                        .map_err(|e| map_sqlx_error("confirmed_sessions", e))?,
                })
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl ConfirmationLedger for PostgresStore {
    #[instrument(
        skip(self, cmd),
        fields(
            session_id = %cmd.session_id,
            user_id = %cmd.user_id,
            confirmed = cmd.confirmed,
            changed = tracing::field::Empty,
            confirmed_count = tracing::field::Empty
        ),
        err
    )]
    async fn set_attendance(&self, cmd: &SetAttendance) -> Result<AttendanceOutcome, StoreError> {
        let mut tx = self.begin().await?;

        let max: Option<i32> =
            sqlx::query_scalar("SELECT max_participants FROM classes WHERE id = $1 FOR UPDATE")
                .bind(cmd.session_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("lock_class", e))?;

        let Some(max) = max else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::NotFound);
        };
        let capacity = capacity_from_db(max)?;

        let member = sqlx::query(
            r#"
            SELECT class_id, user_id, confirmed, confirmed_at, updated_at
            FROM class_confirmations
            WHERE class_id = $1 AND user_id = $2
            "#,
        )
        .bind(cmd.session_id.as_uuid())
        .bind(cmd.user_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_confirmation", e))?
        .map(|row| ConfirmationRow::from_row(&row))
        .transpose()
        .map_err(|e| map_sqlx_error("load_confirmation", e))?
        .map(Confirmation::from);

        let count: i64 = sqlx::query_scalar(concat!("SELECT ", confirmed_count!("$1")))
            .bind(cmd.session_id.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("count_confirmed", e))?;

        let mut decision = SessionRoster::load(cmd.session_id, capacity, count as u32, member);
        let events = match execute(&mut decision, cmd) {
            Ok(events) => events,
            Err(e) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(e.into());
            }
        };

        if let (false, Some(member)) = (events.is_empty(), decision.member()) {
            sqlx::query(
                r#"
                INSERT INTO class_confirmations (class_id, user_id, confirmed, confirmed_at, updated_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (class_id, user_id)
                DO UPDATE SET
                    confirmed = EXCLUDED.confirmed,
                    confirmed_at = EXCLUDED.confirmed_at,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(member.session_id.as_uuid())
            .bind(member.user_id.as_uuid())
            .bind(member.confirmed)
            .bind(member.confirmed_at)
            .bind(member.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("upsert_confirmation", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        super::log_applied(&events);

        let outcome = decision.outcome(&events);
        let span = Span::current();
        span.record("changed", outcome.changed);
        span.record("confirmed_count", outcome.confirmed_count);
        Ok(outcome)
    }
}

#[async_trait::async_trait]
impl ScheduleQueries for PostgresStore {
    #[instrument(skip(self), err)]
    async fn list_sessions(
        &self,
        filter: &SessionFilter,
        page: PageRequest,
    ) -> Result<Page<SessionSummary>, StoreError> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            session_columns!(),
            " FROM classes c WHERE ",
            date_window!(),
            " ORDER BY c.date ASC NULLS LAST, c.weekday ASC, c.time ASC, c.id ASC LIMIT $3 OFFSET $4"
        ))
        .bind(filter.date_from)
        .bind(filter.date_to)
        .bind(i64::from(page.limit()))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_sessions", e))?;

        let total: i64 = sqlx::query_scalar(concat!(
            "SELECT COUNT(*) FROM classes c WHERE ",
            date_window!()
        ))
        .bind(filter.date_from)
        .bind(filter.date_to)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_sessions", e))?;

        let items = rows.iter().map(summary_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, page, total as u64))
    }

    #[instrument(skip(self), err)]
    async fn all_sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            session_columns!(),
            " FROM classes c ORDER BY c.date ASC NULLS LAST, c.weekday ASC, c.time ASC, c.id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("all_sessions", e))?;

        rows.iter().map(summary_from_row).collect()
    }

    #[instrument(skip(self), fields(session_id = %session_id), err)]
    async fn session_detail(
        &self,
        session_id: SessionId,
        viewer: Option<UserId>,
    ) -> Result<SessionDetail, StoreError> {
        let row = sqlx::query(concat!(
            "SELECT ",
            session_columns!(),
            ", EXISTS (SELECT 1 FROM class_confirmations v ",
            "WHERE v.class_id = c.id AND v.user_id = $2 AND v.confirmed) AS viewer_confirmed ",
            "FROM classes c WHERE c.id = $1"
        ))
        .bind(session_id.as_uuid())
        .bind(viewer.map(Uuid::from))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("session_detail", e))?
        .ok_or(StoreError::NotFound)?;

        let viewer_confirmed: bool = row
            .try_get("viewer_confirmed")
            .map_err(|e| map_sqlx_error("session_detail", e))?;
        let summary = summary_from_row(&row)?;
        Ok(SessionDetail::new(summary, viewer.map(|_| viewer_confirmed)))
    }

    #[instrument(skip(self), fields(session_id = %session_id), err)]
    async fn participants(&self, session_id: SessionId) -> Result<Vec<Participant>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT cc.user_id, u.full_name, u.avatar_url, cc.confirmed_at
            FROM class_confirmations cc
            LEFT JOIN users u ON u.id = cc.user_id
            WHERE cc.class_id = $1 AND cc.confirmed
            ORDER BY cc.confirmed_at ASC, cc.user_id ASC
            "#,
        )
        .bind(session_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("participants", e))?;

        rows.iter()
            .map(|row| {
                Ok(Participant {
                    user_id: UserId::from_uuid(row.try_get("user_id")?),
                    full_name: row.try_get("full_name")?,
                    avatar_url: row.try_get("avatar_url")?,
                    confirmed_at: row.try_get("confirmed_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| map_sqlx_error("participants", e))
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn confirmed_sessions(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> Result<Page<ConfirmedSession>, StoreError> {
        let items = self.confirmed_rows(user_id, Some(page)).await?;
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM class_confirmations WHERE user_id = $1 AND confirmed",
        )
        .bind(user_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_confirmed_sessions", e))?;
        Ok(Page::new(items, page, total as u64))
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn user_history(
        &self,
        user_id: UserId,
        status: HistoryStatus,
        page: PageRequest,
    ) -> Result<Page<HistoryEntry>, StoreError> {
        let confirmed = match status {
            HistoryStatus::All => None,
            HistoryStatus::Confirmed => Some(true),
            HistoryStatus::Cancelled => Some(false),
        };

        let rows = sqlx::query(concat!(
            "SELECT ",
            session_columns!(),
            ", cc.confirmed AS member_confirmed, cc.confirmed_at AS member_confirmed_at, ",
            "cc.updated_at AS member_updated_at ",
            "FROM class_confirmations cc JOIN classes c ON c.id = cc.class_id ",
            "WHERE cc.user_id = $1 AND ($2::boolean IS NULL OR cc.confirmed = $2) ",
            "ORDER BY c.date DESC NULLS LAST, c.weekday DESC, c.time DESC, c.id ASC ",
            "LIMIT $3 OFFSET $4"
        ))
        .bind(user_id.as_uuid())
        .bind(confirmed)
        .bind(i64::from(page.limit()))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("user_history", e))?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM class_confirmations
            WHERE user_id = $1 AND ($2::boolean IS NULL OR confirmed = $2)
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(confirmed)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_user_history", e))?;

        let items = rows
            .iter()
            .map(|row| {
                let class = summary_from_row(row)?.session;
                let decode = |e| map_sqlx_error("user_history", e);
                Ok(HistoryEntry {
                    class,
                    confirmed: row.try_get("member_confirmed").map_err(decode)?,
                    confirmed_at: row.try_get("member_confirmed_at").map_err(decode)?,
                    updated_at: row.try_get("member_updated_at").map_err(decode)?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(Page::new(items, page, total as u64))
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn user_stats(&self, user_id: UserId, today: NaiveDate) -> Result<UserStats, StoreError> {
        let confirmed = self.confirmed_rows(user_id, None).await?;
        Ok(UserStats::from_confirmed(
            confirmed.iter().map(|c| &c.summary.session),
            today,
        ))
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn profile(&self, user_id: UserId) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, full_name, avatar_url, preferred_days, preferred_times
            FROM users WHERE id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("profile", e))?;

        row.map(|row| {
            Ok(UserProfile {
                user_id: UserId::from_uuid(row.try_get("id")?),
                full_name: row.try_get("full_name")?,
                avatar_url: row.try_get("avatar_url")?,
                preferred_days: row.try_get("preferred_days")?,
                preferred_times: row.try_get("preferred_times")?,
            })
        })
        .transpose()
        .map_err(|e: sqlx::Error| map_sqlx_error("profile", e))
    }
}

#[async_trait::async_trait]
impl SessionCatalog for PostgresStore {
    #[instrument(skip(self, session), fields(session_id = %session.id), err)]
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO classes (
                id, title, description, day, weekday, time, date,
                location, instructor, max_participants, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(&session.title)
        .bind(&session.description)
        .bind(&session.day)
        .bind(i16::from(session.weekday_ordinal()))
        .bind(time_to_db(session.time))
        .bind(session.date)
        .bind(&session.location)
        .bind(&session.instructor)
        .bind(session.max_participants.get() as i32)
        .bind(session.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_session", e))?;
        Ok(())
    }

    #[instrument(skip(self, profile), fields(user_id = %profile.user_id), err)]
    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, full_name, avatar_url, preferred_days, preferred_times)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                full_name = EXCLUDED.full_name,
                avatar_url = EXCLUDED.avatar_url,
                preferred_days = EXCLUDED.preferred_days,
                preferred_times = EXCLUDED.preferred_times
            "#,
        )
        .bind(profile.user_id.as_uuid())
        .bind(&profile.full_name)
        .bind(&profile.avatar_url)
        .bind(&profile.preferred_days)
        .bind(&profile.preferred_times)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_profile", e))?;
        Ok(())
    }
}

/// Map SQLx errors to `StoreError`, separating retryable failures from the rest.
fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => StoreError::transient(operation, msg),
                // lock_not_available, query_canceled (statement_timeout)
                Some("55P03") | Some("57014") => StoreError::transient(operation, msg),
                // foreign_key_violation: the class disappeared under us
                Some("23503") => StoreError::NotFound,
                Some("23514") => StoreError::Domain(DomainError::validation(msg)),
                _ => StoreError::internal(operation, msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::transient(operation, "timed out acquiring a connection")
        }
        sqlx::Error::Io(e) => StoreError::transient(operation, e.to_string()),
        sqlx::Error::PoolClosed => StoreError::internal(operation, "connection pool closed"),
        other => StoreError::internal(operation, other.to_string()),
    }
}

fn capacity_from_db(max: i32) -> Result<Capacity, StoreError> {
    u32::try_from(max)
        .map_err(|_| DomainError::invariant(format!("negative max_participants: {max}")))
        .and_then(Capacity::new)
        .map_err(|e| StoreError::internal("decode_class", e.to_string()))
}

fn time_to_db(time: TimeSlot) -> NaiveTime {
    NaiveTime::from_hms_opt(u32::from(time.hour()), u32::from(time.minute()), 0)
        .unwrap_or(NaiveTime::MIN)
}

fn summary_from_row(row: &PgRow) -> Result<SessionSummary, StoreError> {
    let raw = SessionRow::from_row(row).map_err(|e| map_sqlx_error("decode_class", e))?;
    let confirmed_count = u32::try_from(raw.confirmed_count)
        .map_err(|_| StoreError::internal("decode_class", "confirmed_count out of range"))?;
    Ok(SessionSummary {
        session: raw.into_session()?,
        confirmed_count,
    })
}

// SQLx row types

#[derive(Debug)]
struct SessionRow {
    id: Uuid,
    title: Option<String>,
    description: Option<String>,
    day: String,
    time: NaiveTime,
    date: Option<NaiveDate>,
    location: String,
    instructor: String,
    max_participants: i32,
    created_at: DateTime<Utc>,
    confirmed_count: i64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for SessionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(SessionRow {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            day: row.try_get("day")?,
            time: row.try_get("time")?,
            date: row.try_get("date")?,
            location: row.try_get("location")?,
            instructor: row.try_get("instructor")?,
            max_participants: row.try_get("max_participants")?,
            created_at: row.try_get("created_at")?,
            confirmed_count: row.try_get("confirmed_count")?,
        })
    }
}

impl SessionRow {
    fn into_session(self) -> Result<Session, StoreError> {
        use chrono::Timelike;

        let time = TimeSlot::new(self.time.hour() as u8, self.time.minute() as u8)
            .map_err(|e| StoreError::internal("decode_class", e.to_string()))?;
        Ok(Session {
            id: SessionId::from_uuid(self.id),
            title: self.title,
            description: self.description,
            day: self.day,
            time,
            date: self.date,
            location: self.location,
            instructor: self.instructor,
            max_participants: capacity_from_db(self.max_participants)?,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug)]
struct ConfirmationRow {
    class_id: Uuid,
    user_id: Uuid,
    confirmed: bool,
    confirmed_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ConfirmationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ConfirmationRow {
            class_id: row.try_get("class_id")?,
            user_id: row.try_get("user_id")?,
            confirmed: row.try_get("confirmed")?,
            confirmed_at: row.try_get("confirmed_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl From<ConfirmationRow> for Confirmation {
    fn from(row: ConfirmationRow) -> Self {
        Confirmation {
            session_id: SessionId::from_uuid(row.class_id),
            user_id: UserId::from_uuid(row.user_id),
            confirmed: row.confirmed,
            confirmed_at: row.confirmed_at,
            updated_at: row.updated_at,
        }
    }
}
