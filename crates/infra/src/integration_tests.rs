//! Integration tests for the confirmation pipeline.
//!
//! Tests: ConfirmationService → ConfirmationLedger → ScheduleQueries → Notifier
//!
//! Verifies:
//! - Capacity is never exceeded under concurrent confirmations
//! - Confirm/cancel are idempotent and counts stay consistent
//! - Transient failures are retried and notify at most once
//!
//! The Postgres tests run only when `TEST_DATABASE_URL` points at a scratch database.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};

    use presenca_attendance::{
        portuguese_name, AttendanceOutcome, HistoryStatus, NewSession, Session, SetAttendance,
        UserProfile,
    };
    use presenca_core::{SessionId, UserId};

    use crate::config::RetryPolicy;
    use crate::confirmation_service::{ConfirmationService, ServiceError};
    use crate::notify::{AttendanceNotice, InMemoryNotifier};
    use crate::seed::{seed_schedule, weekly_schedule};
    use crate::store::{
        ConfirmationLedger, InMemoryStore, PageRequest, ScheduleQueries, SessionCatalog,
        SessionFilter, StoreError,
    };

    fn weekly_session(capacity: u32) -> Session {
        NewSession {
            title: Some("Futevôlei".to_string()),
            description: None,
            day: "Segunda".to_string(),
            time: "18:30".to_string(),
            date: None,
            location: "Quadra Central".to_string(),
            instructor: "Pedro Santos".to_string(),
            max_participants: capacity,
        }
        .validate(SessionId::new(), Utc::now())
        .unwrap()
    }

    fn dated_session(date: NaiveDate, time: &str, capacity: u32) -> Session {
        NewSession {
            title: None,
            description: None,
            day: portuguese_name(date.weekday()).to_string(),
            time: time.to_string(),
            date: Some(date),
            location: "Quadra Lateral".to_string(),
            instructor: "Ana Costa".to_string(),
            max_participants: capacity,
        }
        .validate(SessionId::new(), Utc::now())
        .unwrap()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    fn setup() -> (Arc<InMemoryStore>, Arc<InMemoryNotifier>, ConfirmationService) {
        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(InMemoryNotifier::new());
        let service =
            ConfirmationService::new(store.clone(), store.clone(), notifier.clone(), fast_retry());
        (store, notifier, service)
    }

    async fn insert(store: &InMemoryStore, session: &Session) -> SessionId {
        store.insert_session(session).await.unwrap();
        session.id
    }

    async fn count(store: &InMemoryStore, session_id: SessionId) -> u32 {
        store
            .session_detail(session_id, None)
            .await
            .unwrap()
            .summary
            .confirmed_count
    }

    /// Notifications are spawned; give them a moment to land.
    async fn settled_notifications(notifier: &InMemoryNotifier) -> Vec<AttendanceNotice> {
        let mut last = 0;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let sent = notifier.sent().len();
            if sent > 0 && sent == last {
                break;
            }
            last = sent;
        }
        notifier.sent()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_confirmations_never_overbook() {
        let (store, _notifier, service) = setup();
        let session_id = insert(&store, &weekly_session(3)).await;

        let mut handles = Vec::new();
        for _ in 0..12 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.confirm(UserId::new(), session_id).await
            }));
        }

        let mut ok = 0;
        let mut full = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(outcome) => {
                    assert!(outcome.confirmed);
                    ok += 1;
                }
                Err(ServiceError::ClassFull { capacity }) => {
                    assert_eq!(capacity, 3);
                    full += 1;
                }
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(ok, 3);
        assert_eq!(full, 9);
        assert_eq!(count(&store, session_id).await, 3);
        assert_eq!(store.participants(session_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn capacity_two_scenario() {
        let (store, _notifier, service) = setup();
        let session_id = insert(&store, &weekly_session(2)).await;
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());

        assert_eq!(service.confirm(a, session_id).await.unwrap().confirmed_count, 1);
        assert_eq!(service.confirm(b, session_id).await.unwrap().confirmed_count, 2);
        assert_eq!(
            service.confirm(c, session_id).await.unwrap_err(),
            ServiceError::ClassFull { capacity: 2 }
        );

        let cancelled = service.cancel(a, session_id).await.unwrap();
        assert!(!cancelled.confirmed);
        assert_eq!(cancelled.confirmed_count, 1);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(service.confirm(c, session_id).await.unwrap().confirmed);
        assert_eq!(count(&store, session_id).await, 2);

        let roster: Vec<UserId> = store
            .participants(session_id)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.user_id)
            .collect();
        assert_eq!(roster, vec![b, c]);
    }

    #[tokio::test]
    async fn confirm_and_cancel_are_idempotent() {
        let (store, notifier, service) = setup();
        let session_id = insert(&store, &weekly_session(5)).await;
        let user = UserId::new();

        let never_confirmed = service.cancel(user, session_id).await.unwrap();
        assert_eq!(
            never_confirmed,
            AttendanceOutcome {
                confirmed: false,
                changed: false,
                confirmed_count: 0
            }
        );

        let first = service.confirm(user, session_id).await.unwrap();
        let second = service.confirm(user, session_id).await.unwrap();
        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(second.confirmed_count, 1);

        assert!(service.cancel(user, session_id).await.unwrap().changed);
        assert!(!service.cancel(user, session_id).await.unwrap().changed);
        assert_eq!(count(&store, session_id).await, 0);

        // one for the confirm, one for the cancel
        let sent = settled_notifications(&notifier).await;
        assert_eq!(sent.len(), 2);
        assert!(sent[0].confirmed);
        assert!(!sent[1].confirmed);
        assert_eq!(sent[0].class.time.to_string(), "18:30");
        assert_eq!(sent[1].message(), "Sua presença na aula \"Futevôlei\" foi cancelada");
    }

    #[tokio::test]
    async fn confirm_cancel_confirm_round_trip() {
        let (store, _notifier, service) = setup();
        let session_id = insert(&store, &weekly_session(4)).await;
        let other = UserId::new();
        let user = UserId::new();
        service.confirm(other, session_id).await.unwrap();

        service.confirm(user, session_id).await.unwrap();
        let baseline = count(&store, session_id).await;
        service.cancel(user, session_id).await.unwrap();
        let outcome = service.confirm(user, session_id).await.unwrap();

        assert!(outcome.confirmed);
        assert_eq!(outcome.confirmed_count, baseline);
        let detail = store.session_detail(session_id, Some(user)).await.unwrap();
        assert_eq!(detail.user_confirmed, Some(true));
        assert_eq!(detail.summary.confirmed_count, 2);
    }

    #[tokio::test]
    async fn capacity_one_boundary() {
        let (store, _notifier, service) = setup();
        let session_id = insert(&store, &weekly_session(1)).await;
        let (a, b) = (UserId::new(), UserId::new());

        service.confirm(a, session_id).await.unwrap();
        assert!(store.session_detail(session_id, None).await.unwrap().is_full);
        assert!(matches!(
            service.confirm(b, session_id).await,
            Err(ServiceError::ClassFull { capacity: 1 })
        ));

        service.cancel(a, session_id).await.unwrap();
        assert!(service.confirm(b, session_id).await.unwrap().confirmed);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (_store, notifier, service) = setup();
        let err = service.confirm(UserId::new(), SessionId::new()).await.unwrap_err();
        assert_eq!(err, ServiceError::NotFound);
        assert!(settled_notifications(&notifier).await.is_empty());
    }

    #[tokio::test]
    async fn roster_is_ordered_by_confirmation_time_with_profiles() {
        let store = InMemoryStore::new();
        let session_id = insert(&store, &weekly_session(10)).await;
        let base = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
        let users: Vec<UserId> = (0..3).map(|_| UserId::new()).collect();

        store
            .upsert_profile(&UserProfile::new(users[1], "Bia"))
            .await
            .unwrap();

        // confirm in reverse order
        for (i, user) in users.iter().rev().enumerate() {
            store
                .set_attendance(&SetAttendance {
                    session_id,
                    user_id: *user,
                    confirmed: true,
                    requested_at: base + ChronoDuration::minutes(i as i64),
                })
                .await
                .unwrap();
        }

        let roster = store.participants(session_id).await.unwrap();
        let ids: Vec<UserId> = roster.iter().map(|p| p.user_id).collect();
        assert_eq!(ids, vec![users[2], users[1], users[0]]);
        assert_eq!(roster[1].full_name.as_deref(), Some("Bia"));
        assert_eq!(roster[0].full_name, None);

        assert!(store.participants(SessionId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listing_filters_and_paginates() {
        let store = InMemoryStore::new();
        let monday = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        for offset in 0..5 {
            let date = monday + ChronoDuration::days(offset);
            insert(&store, &dated_session(date, "18:00", 8)).await;
        }
        insert(&store, &weekly_session(8)).await;

        let all = store
            .list_sessions(&SessionFilter::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(all.info.total, 6);
        // undated sessions sort last
        assert!(all.items.last().unwrap().session.date.is_none());

        let window = SessionFilter::new(Some(monday + ChronoDuration::days(1)), None).unwrap();
        let page = store
            .list_sessions(&window, PageRequest::new(Some(2), Some(2)).unwrap())
            .await
            .unwrap();
        assert_eq!(page.info.total, 4);
        assert_eq!(page.info.pages, 2);
        let dates: Vec<_> = page.items.iter().filter_map(|s| s.session.date).collect();
        assert_eq!(
            dates,
            vec![monday + ChronoDuration::days(3), monday + ChronoDuration::days(4)]
        );
    }

    #[tokio::test]
    async fn seeded_schedule_lists_by_weekday_then_time() {
        let store = InMemoryStore::new();
        seed_schedule(&store, &store, Utc::now()).await.unwrap();

        let page = store
            .list_sessions(&SessionFilter::default(), PageRequest::new(None, Some(6)).unwrap())
            .await
            .unwrap();
        let labels: Vec<String> = page
            .items
            .iter()
            .map(|s| format!("{} {}", s.session.day, s.session.time))
            .collect();
        assert_eq!(
            labels,
            vec![
                "Segunda 08:30",
                "Segunda 17:00",
                "Segunda 18:30",
                "Segunda 20:00",
                "Terça 06:30",
                "Terça 08:00",
            ]
        );

        // Identical slots fall back to id order, so repeated reads page the same way.
        let twin_a = insert(&store, &weekly_session(8)).await;
        let twin_b = insert(&store, &weekly_session(8)).await;
        let all = store.all_sessions().await.unwrap();
        let twins: Vec<SessionId> = all
            .iter()
            .map(|s| s.session.id)
            .filter(|id| *id == twin_a || *id == twin_b)
            .collect();
        assert_eq!(twins, vec![twin_a.min(twin_b), twin_a.max(twin_b)]);
    }

    #[tokio::test]
    async fn history_confirmed_list_and_stats() {
        let (store, _notifier, service) = setup();
        let today = Utc::now().date_naive();
        let past = insert(&store, &dated_session(today - ChronoDuration::days(40), "08:30", 8)).await;
        let soon = insert(&store, &dated_session(today + ChronoDuration::days(1), "08:30", 8)).await;
        let later = insert(&store, &dated_session(today + ChronoDuration::days(2), "20:00", 8)).await;
        let user = UserId::new();

        for id in [past, soon, later] {
            service.confirm(user, id).await.unwrap();
        }
        service.cancel(user, later).await.unwrap();

        let history = store
            .user_history(user, HistoryStatus::All, PageRequest::default())
            .await
            .unwrap();
        let order: Vec<SessionId> = history.items.iter().map(|h| h.class.id).collect();
        assert_eq!(order, vec![later, soon, past]);

        let cancelled = store
            .user_history(user, HistoryStatus::Cancelled, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(cancelled.info.total, 1);
        assert!(!cancelled.items[0].confirmed);

        let confirmed = store
            .confirmed_sessions(user, PageRequest::default())
            .await
            .unwrap();
        let ids: Vec<SessionId> = confirmed.items.iter().map(|c| c.summary.session.id).collect();
        assert_eq!(ids, vec![past, soon]);

        let stats = store.user_stats(user, today).await.unwrap();
        assert_eq!(stats.total_classes, 2);
        assert_eq!(stats.upcoming_classes, 1);
        assert_eq!(stats.favorite_times.len(), 1);
        assert_eq!(stats.favorite_times[0].frequency, 2);
    }

    /// Fails the first `failures` calls with a transient error, then delegates.
    struct FlakyLedger {
        inner: Arc<InMemoryStore>,
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl ConfirmationLedger for FlakyLedger {
        async fn set_attendance(
            &self,
            cmd: &SetAttendance,
        ) -> Result<AttendanceOutcome, StoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(StoreError::transient("lock_class", "deadlock detected"));
            }
            self.inner.set_attendance(cmd).await
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_and_notify_once() {
        let store = Arc::new(InMemoryStore::new());
        let session_id = insert(&store, &weekly_session(2)).await;
        let ledger = Arc::new(FlakyLedger {
            inner: store.clone(),
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let notifier = Arc::new(InMemoryNotifier::new());
        let service =
            ConfirmationService::new(ledger.clone(), store.clone(), notifier.clone(), fast_retry());

        let outcome = service.confirm(UserId::new(), session_id).await.unwrap();
        assert!(outcome.confirmed);
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 3);
        assert_eq!(settled_notifications(&notifier).await.len(), 1);
        assert_eq!(count(&store, session_id).await, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_leave_no_trace() {
        let store = Arc::new(InMemoryStore::new());
        let session_id = insert(&store, &weekly_session(2)).await;
        let ledger = Arc::new(FlakyLedger {
            inner: store.clone(),
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let notifier = Arc::new(InMemoryNotifier::new());
        let service =
            ConfirmationService::new(ledger.clone(), store.clone(), notifier.clone(), fast_retry());

        let err = service.confirm(UserId::new(), session_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unavailable(_)));
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 4);
        assert_eq!(count(&store, session_id).await, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(notifier.sent().is_empty());
    }

    mod postgres {
        use super::*;
        use crate::notify::PostgresNotifier;
        use crate::store::{PostgresOptions, PostgresStore};

        async fn store() -> Option<Arc<PostgresStore>> {
            store_with_timeout(Duration::from_secs(5)).await
        }

        async fn store_with_timeout(statement_timeout: Duration) -> Option<Arc<PostgresStore>> {
            let url = std::env::var("TEST_DATABASE_URL").ok()?;
            let store = PostgresStore::connect(&PostgresOptions {
                url,
                max_connections: 10,
                acquire_timeout: Duration::from_secs(2),
                statement_timeout,
            })
            .await
            .expect("connect to TEST_DATABASE_URL");
            store.migrate().await.expect("apply schema");
            Some(Arc::new(store))
        }

        #[tokio::test]
        async fn postgres_lists_in_the_same_order_as_memory() {
            let Some(store) = store().await else {
                return;
            };
            let memory = InMemoryStore::new();
            let now = Utc::now();
            let mut sessions: Vec<Session> = weekly_schedule()
                .into_iter()
                .map(|new| new.validate(SessionId::new(), now).unwrap())
                .collect();
            sessions.push(weekly_session(8));
            sessions.push(weekly_session(8));
            sessions.push(dated_session(NaiveDate::from_ymd_opt(2024, 6, 5).unwrap(), "17:00", 8));
            for session in &sessions {
                store.insert_session(session).await.unwrap();
                memory.insert_session(session).await.unwrap();
            }

            let ours = |ids: Vec<SessionId>| -> Vec<SessionId> {
                ids.into_iter()
                    .filter(|id| sessions.iter().any(|s| s.id == *id))
                    .collect()
            };
            let from_pg = ours(
                store
                    .all_sessions()
                    .await
                    .unwrap()
                    .iter()
                    .map(|s| s.session.id)
                    .collect(),
            );
            let from_memory: Vec<SessionId> = memory
                .all_sessions()
                .await
                .unwrap()
                .iter()
                .map(|s| s.session.id)
                .collect();
            assert_eq!(from_pg.len(), sessions.len());
            assert_eq!(from_pg, from_memory);
        }

        #[tokio::test]
        async fn postgres_notification_row_carries_class_details() {
            let Some(store) = store().await else {
                return;
            };
            let session = weekly_session(4);
            store.insert_session(&session).await.unwrap();
            let notifier = Arc::new(PostgresNotifier::new(store.pool().clone()));
            let service =
                ConfirmationService::new(store.clone(), store.clone(), notifier, fast_retry());
            let user = UserId::new();
            service.confirm(user, session.id).await.unwrap();

            let mut row = None;
            for _ in 0..50 {
                tokio::time::sleep(Duration::from_millis(20)).await;
                row = sqlx::query_as::<_, (String, String, String, serde_json::Value)>(
                    "SELECT type, title, message, data FROM notifications WHERE user_id = $1",
                )
                .bind(user.as_uuid())
                .fetch_optional(store.pool())
                .await
                .unwrap();
                if row.is_some() {
                    break;
                }
            }
            let (kind, title, message, data) = row.expect("notification stored");
            assert_eq!(kind, "class_confirmed");
            assert_eq!(title, "Presença confirmada");
            assert_eq!(message, "Sua presença na aula \"Futevôlei\" foi confirmada");
            assert_eq!(data["class_id"], session.id.to_string());
            assert_eq!(data["time"], "18:30");
            assert!(data["date"].is_null());
        }

        #[tokio::test]
        async fn postgres_statement_timeout_aborts_without_writing() {
            let Some(store) = store_with_timeout(Duration::from_millis(200)).await else {
                return;
            };
            let session = weekly_session(4);
            store.insert_session(&session).await.unwrap();

            // Another writer holds the class row for longer than the timeout.
            let mut holder = store.pool().begin().await.unwrap();
            sqlx::query("SELECT id FROM classes WHERE id = $1 FOR UPDATE")
                .bind(session.id.as_uuid())
                .execute(&mut *holder)
                .await
                .unwrap();

            let notifier = Arc::new(InMemoryNotifier::new());
            let service = ConfirmationService::new(
                store.clone(),
                store.clone(),
                notifier.clone(),
                fast_retry(),
            );
            let err = service.confirm(UserId::new(), session.id).await.unwrap_err();
            assert!(matches!(err, ServiceError::Unavailable(_)), "got {err:?}");

            holder.rollback().await.unwrap();

            let detail = store.session_detail(session.id, None).await.unwrap();
            assert_eq!(detail.summary.confirmed_count, 0);
            assert!(store.participants(session.id).await.unwrap().is_empty());
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(notifier.sent().is_empty());
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn postgres_concurrent_confirmations_never_overbook() {
            let Some(store) = store().await else {
                return;
            };
            let session = weekly_session(2);
            store.insert_session(&session).await.unwrap();
            let service = ConfirmationService::new(
                store.clone(),
                store.clone(),
                Arc::new(InMemoryNotifier::new()),
                fast_retry(),
            );

            let mut handles = Vec::new();
            for _ in 0..8 {
                let service = service.clone();
                let session_id = session.id;
                handles.push(tokio::spawn(async move {
                    service.confirm(UserId::new(), session_id).await
                }));
            }
            let mut ok = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(_) => ok += 1,
                    Err(ServiceError::ClassFull { .. }) => {}
                    Err(other) => panic!("unexpected error: {other:?}"),
                }
            }
            assert_eq!(ok, 2);

            let detail = store.session_detail(session.id, None).await.unwrap();
            assert_eq!(detail.summary.confirmed_count, 2);
            assert!(detail.is_full);
            assert_eq!(store.participants(session.id).await.unwrap().len(), 2);
        }

        #[tokio::test]
        async fn postgres_cancel_keeps_record_and_history() {
            let Some(store) = store().await else {
                return;
            };
            let session = weekly_session(3);
            store.insert_session(&session).await.unwrap();
            let user = UserId::new();
            store
                .upsert_profile(&UserProfile::new(user, "Carla"))
                .await
                .unwrap();

            let cmd = |confirmed| SetAttendance {
                session_id: session.id,
                user_id: user,
                confirmed,
                requested_at: Utc::now(),
            };
            assert!(store.set_attendance(&cmd(true)).await.unwrap().changed);
            assert!(!store.set_attendance(&cmd(true)).await.unwrap().changed);
            let cancelled = store.set_attendance(&cmd(false)).await.unwrap();
            assert_eq!((cancelled.confirmed, cancelled.confirmed_count), (false, 0));

            let history = store
                .user_history(user, HistoryStatus::Cancelled, PageRequest::default())
                .await
                .unwrap();
            assert_eq!(history.info.total, 1);
            assert_eq!(history.items[0].class.id, session.id);

            let missing = store
                .set_attendance(&SetAttendance {
                    session_id: SessionId::new(),
                    ..cmd(true)
                })
                .await;
            assert!(matches!(missing, Err(StoreError::NotFound)));
        }
    }
}
