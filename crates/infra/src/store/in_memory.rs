use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::NaiveDate;

use presenca_attendance::{
    AttendanceOutcome, Confirmation, ConfirmedSession, HistoryEntry, HistoryStatus, Participant,
    Session, SessionDetail, SessionRoster, SessionSummary, SetAttendance, UserProfile, UserStats,
};
use presenca_core::{execute, SessionId, UserId};

use super::query::{Page, PageRequest, SessionFilter};
use super::r#trait::{ConfirmationLedger, ScheduleQueries, SessionCatalog, StoreError};

/// A session and every confirmation record attached to it.
#[derive(Debug)]
struct Roster {
    session: Session,
    members: HashMap<UserId, Confirmation>,
}

impl Roster {
    fn confirmed_count(&self) -> u32 {
        self.members.values().filter(|c| c.confirmed).count() as u32
    }

    fn summary(&self) -> SessionSummary {
        SessionSummary {
            session: self.session.clone(),
            confirmed_count: self.confirmed_count(),
        }
    }

    fn member(&self, user_id: UserId) -> Option<&Confirmation> {
        self.members.get(&user_id)
    }
}

/// In-memory session store and confirmation ledger.
///
/// Intended for tests/dev. Each session has its own mutex, so writers on one session
/// serialize while different sessions proceed independently. The outer map lock is
/// only held long enough to clone the session handle.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Roster>>>>,
    profiles: RwLock<HashMap<UserId, UserProfile>>,
}

fn poisoned(operation: &'static str) -> StoreError {
    StoreError::internal(operation, "lock poisoned")
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn roster(&self, session_id: SessionId) -> Result<Option<Arc<Mutex<Roster>>>, StoreError> {
        let sessions = self.sessions.read().map_err(|_| poisoned("load_session"))?;
        Ok(sessions.get(&session_id).cloned())
    }

    /// Visit every session under its own lock, collecting whatever `f` yields.
    fn collect<T>(
        &self,
        operation: &'static str,
        mut f: impl FnMut(&Roster) -> Option<T>,
    ) -> Result<Vec<T>, StoreError> {
        let handles: Vec<_> = self
            .sessions
            .read()
            .map_err(|_| poisoned(operation))?
            .values()
            .cloned()
            .collect();

        let mut out = Vec::new();
        for handle in handles {
            let roster = handle.lock().map_err(|_| poisoned(operation))?;
            if let Some(v) = f(&roster) {
                out.push(v);
            }
        }
        Ok(out)
    }

    fn confirmed_by(&self, user_id: UserId) -> Result<Vec<ConfirmedSession>, StoreError> {
        let mut rows = self.collect("confirmed_sessions", |r| {
            let member = r.member(user_id).filter(|c| c.confirmed)?;
            Some(ConfirmedSession {
                summary: r.summary(),
                confirmed_at: member.confirmed_at,
            })
        })?;
        rows.sort_by_key(|c| c.summary.session.schedule_key());
        Ok(rows)
    }
}

#[async_trait::async_trait]
impl ConfirmationLedger for InMemoryStore {
    async fn set_attendance(&self, cmd: &SetAttendance) -> Result<AttendanceOutcome, StoreError> {
        let handle = self.roster(cmd.session_id)?.ok_or(StoreError::NotFound)?;
        let mut roster = handle.lock().map_err(|_| poisoned("set_attendance"))?;

        let mut decision = SessionRoster::load(
            cmd.session_id,
            roster.session.max_participants,
            roster.confirmed_count(),
            roster.member(cmd.user_id).cloned(),
        );
        let events = execute(&mut decision, cmd)?;

        if !events.is_empty() {
            if let Some(member) = decision.member() {
                roster.members.insert(cmd.user_id, member.clone());
            }
            super::log_applied(&events);
        }
        Ok(decision.outcome(&events))
    }
}

#[async_trait::async_trait]
impl ScheduleQueries for InMemoryStore {
    async fn list_sessions(
        &self,
        filter: &SessionFilter,
        page: PageRequest,
    ) -> Result<Page<SessionSummary>, StoreError> {
        let mut rows = self.collect("list_sessions", |r| {
            filter.matches(&r.session).then(|| r.summary())
        })?;
        rows.sort_by_key(|s| s.session.schedule_key());
        Ok(page.slice(rows))
    }

    async fn all_sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let mut rows = self.collect("all_sessions", |r| Some(r.summary()))?;
        rows.sort_by_key(|s| s.session.schedule_key());
        Ok(rows)
    }

    async fn session_detail(
        &self,
        session_id: SessionId,
        viewer: Option<UserId>,
    ) -> Result<SessionDetail, StoreError> {
        let handle = self.roster(session_id)?.ok_or(StoreError::NotFound)?;
        let roster = handle.lock().map_err(|_| poisoned("session_detail"))?;
        let user_confirmed =
            viewer.map(|u| roster.member(u).is_some_and(|c| c.confirmed));
        Ok(SessionDetail::new(roster.summary(), user_confirmed))
    }

    async fn participants(&self, session_id: SessionId) -> Result<Vec<Participant>, StoreError> {
        let Some(handle) = self.roster(session_id)? else {
            return Ok(vec![]);
        };
        let mut confirmed: Vec<Confirmation> = {
            let roster = handle.lock().map_err(|_| poisoned("participants"))?;
            roster.members.values().filter(|c| c.confirmed).cloned().collect()
        };
        confirmed.sort_by_key(|c| (c.confirmed_at, c.user_id));

        let profiles = self.profiles.read().map_err(|_| poisoned("participants"))?;
        Ok(confirmed
            .into_iter()
            .map(|c| {
                let profile = profiles.get(&c.user_id);
                Participant {
                    user_id: c.user_id,
                    full_name: profile.and_then(|p| p.full_name.clone()),
                    avatar_url: profile.and_then(|p| p.avatar_url.clone()),
                    confirmed_at: c.confirmed_at,
                }
            })
            .collect())
    }

    async fn confirmed_sessions(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> Result<Page<ConfirmedSession>, StoreError> {
        Ok(page.slice(self.confirmed_by(user_id)?))
    }

    async fn user_history(
        &self,
        user_id: UserId,
        status: HistoryStatus,
        page: PageRequest,
    ) -> Result<Page<HistoryEntry>, StoreError> {
        let mut rows = self.collect("user_history", |r| {
            let member = r.member(user_id).filter(|c| status.matches(c.confirmed))?;
            Some(HistoryEntry {
                class: r.session.clone(),
                confirmed: member.confirmed,
                confirmed_at: member.confirmed_at,
                updated_at: member.updated_at,
            })
        })?;
        rows.sort_by(HistoryEntry::newest_first);
        Ok(page.slice(rows))
    }

    async fn user_stats(&self, user_id: UserId, today: NaiveDate) -> Result<UserStats, StoreError> {
        let confirmed = self.confirmed_by(user_id)?;
        Ok(UserStats::from_confirmed(
            confirmed.iter().map(|c| &c.summary.session),
            today,
        ))
    }

    async fn profile(&self, user_id: UserId) -> Result<Option<UserProfile>, StoreError> {
        let profiles = self.profiles.read().map_err(|_| poisoned("profile"))?;
        Ok(profiles.get(&user_id).cloned())
    }
}

#[async_trait::async_trait]
impl SessionCatalog for InMemoryStore {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned("insert_session"))?;
        if sessions.contains_key(&session.id) {
            return Err(StoreError::internal(
                "insert_session",
                format!("session {} already exists", session.id),
            ));
        }
        sessions.insert(
            session.id,
            Arc::new(Mutex::new(Roster {
                session: session.clone(),
                members: HashMap::new(),
            })),
        );
        Ok(())
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        let mut profiles = self.profiles.write().map_err(|_| poisoned("upsert_profile"))?;
        profiles.insert(profile.user_id, profile.clone());
        Ok(())
    }
}
