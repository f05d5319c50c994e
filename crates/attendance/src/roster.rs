use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use presenca_core::{Aggregate, AggregateRoot, DomainError, SessionId, UserId};

use crate::session::Capacity;

/// One user's attendance record for one session.
///
/// At most one exists per (session, user). Cancelling keeps the record with
/// `confirmed = false`; `confirmed_at` keeps the most recent confirmation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub confirmed: bool,
    pub confirmed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Command: set a user's attendance for a session to `confirmed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetAttendance {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub confirmed: bool,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceConfirmed {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceCancelled {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceEvent {
    Confirmed(AttendanceConfirmed),
    Cancelled(AttendanceCancelled),
}

impl AttendanceEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            AttendanceEvent::Confirmed(_) => "attendance.confirmed",
            AttendanceEvent::Cancelled(_) => "attendance.cancelled",
        }
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            AttendanceEvent::Confirmed(e) => e.session_id,
            AttendanceEvent::Cancelled(e) => e.session_id,
        }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            AttendanceEvent::Confirmed(e) => e.user_id,
            AttendanceEvent::Cancelled(e) => e.user_id,
        }
    }

    pub fn confirmed(&self) -> bool {
        matches!(self, AttendanceEvent::Confirmed(_))
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AttendanceEvent::Confirmed(e) => e.occurred_at,
            AttendanceEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

/// Result of a `SetAttendance` call as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttendanceOutcome {
    /// Resulting confirmed-state for the (session, user) pair.
    pub confirmed: bool,
    /// `false` when the command was already satisfied and nothing was written.
    pub changed: bool,
    /// Confirmed participants after the call.
    pub confirmed_count: u32,
}

/// Aggregate: the slice of a session's roster needed to decide one user's request.
///
/// Loaded by a store inside the unit of work that serializes writers on the session,
/// so `confirmed_count` is authoritative for the duration of the decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRoster {
    session_id: SessionId,
    capacity: Capacity,
    confirmed_count: u32,
    member: Option<Confirmation>,
}

impl SessionRoster {
    pub fn load(
        session_id: SessionId,
        capacity: Capacity,
        confirmed_count: u32,
        member: Option<Confirmation>,
    ) -> Self {
        Self {
            session_id,
            capacity,
            confirmed_count,
            member,
        }
    }

    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    pub fn confirmed_count(&self) -> u32 {
        self.confirmed_count
    }

    pub fn member(&self) -> Option<&Confirmation> {
        self.member.as_ref()
    }

    pub fn is_member_confirmed(&self) -> bool {
        self.member.as_ref().is_some_and(|c| c.confirmed)
    }

    /// Outcome after the given events were applied.
    pub fn outcome(&self, events: &[AttendanceEvent]) -> AttendanceOutcome {
        AttendanceOutcome {
            confirmed: self.is_member_confirmed(),
            changed: !events.is_empty(),
            confirmed_count: self.confirmed_count,
        }
    }

    fn ensure_target(&self, cmd: &SetAttendance) -> Result<(), DomainError> {
        if cmd.session_id != self.session_id {
            return Err(DomainError::invariant("session_id mismatch"));
        }
        if let Some(member) = &self.member {
            if member.user_id != cmd.user_id {
                return Err(DomainError::invariant("roster loaded for a different user"));
            }
        }
        Ok(())
    }

    fn handle_confirm(&self, cmd: &SetAttendance) -> Result<Vec<AttendanceEvent>, DomainError> {
        if self.is_member_confirmed() {
            return Ok(vec![]);
        }
        if self.capacity.is_reached_by(self.confirmed_count) {
            return Err(DomainError::class_full(self.capacity.get()));
        }
        Ok(vec![AttendanceEvent::Confirmed(AttendanceConfirmed {
            session_id: cmd.session_id,
            user_id: cmd.user_id,
            occurred_at: cmd.requested_at,
        })])
    }

    fn handle_cancel(&self, cmd: &SetAttendance) -> Result<Vec<AttendanceEvent>, DomainError> {
        if !self.is_member_confirmed() {
            return Ok(vec![]);
        }
        Ok(vec![AttendanceEvent::Cancelled(AttendanceCancelled {
            session_id: cmd.session_id,
            user_id: cmd.user_id,
            occurred_at: cmd.requested_at,
        })])
    }
}

impl AggregateRoot for SessionRoster {
    type Id = SessionId;

    fn id(&self) -> &Self::Id {
        &self.session_id
    }
}

impl Aggregate for SessionRoster {
    type Command = SetAttendance;
    type Event = AttendanceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AttendanceEvent::Confirmed(e) => {
                self.member = Some(Confirmation {
                    session_id: e.session_id,
                    user_id: e.user_id,
                    confirmed: true,
                    confirmed_at: e.occurred_at,
                    updated_at: e.occurred_at,
                });
                self.confirmed_count += 1;
            }
            AttendanceEvent::Cancelled(e) => {
                if let Some(member) = self.member.as_mut() {
                    member.confirmed = false;
                    member.updated_at = e.occurred_at;
                }
                self.confirmed_count = self.confirmed_count.saturating_sub(1);
            }
        }
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        self.ensure_target(command)?;
        if command.confirmed {
            self.handle_confirm(command)
        } else {
            self.handle_cancel(command)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use presenca_core::execute;
    use proptest::prelude::*;

    fn cmd(session_id: SessionId, user_id: UserId, confirmed: bool) -> SetAttendance {
        SetAttendance {
            session_id,
            user_id,
            confirmed,
            requested_at: Utc::now(),
        }
    }

    fn roster(capacity: u32, count: u32, member: Option<Confirmation>) -> SessionRoster {
        let session_id = member.as_ref().map(|m| m.session_id).unwrap_or_default();
        SessionRoster::load(session_id, Capacity::new(capacity).unwrap(), count, member)
    }

    #[test]
    fn confirm_emits_event_when_below_capacity() {
        let mut r = roster(2, 1, None);
        let user = UserId::new();
        let session_id = *r.id();
        let events = execute(&mut r, &cmd(session_id, user, true)).unwrap();

        assert_eq!(events.len(), 1);
        assert!(events[0].confirmed());
        assert_eq!(r.confirmed_count(), 2);
        assert!(r.is_member_confirmed());
        assert_eq!(
            r.outcome(&events),
            AttendanceOutcome {
                confirmed: true,
                changed: true,
                confirmed_count: 2
            }
        );
    }

    #[test]
    fn confirm_rejects_when_full() {
        let r = roster(2, 2, None);
        let err = r.handle(&cmd(*r.id(), UserId::new(), true)).unwrap_err();
        assert_eq!(err, DomainError::ClassFull { capacity: 2 });
    }

    #[test]
    fn confirm_is_noop_for_confirmed_member_even_when_full() {
        let now = Utc::now();
        let member = Confirmation {
            session_id: SessionId::new(),
            user_id: UserId::new(),
            confirmed: true,
            confirmed_at: now,
            updated_at: now,
        };
        let r = roster(1, 1, Some(member.clone()));
        let events = r.handle(&cmd(member.session_id, member.user_id, true)).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn cancel_of_unknown_member_is_noop() {
        let r = roster(3, 0, None);
        let events = r.handle(&cmd(*r.id(), UserId::new(), false)).unwrap();
        assert!(events.is_empty());
        assert_eq!(r.outcome(&events).confirmed_count, 0);
    }

    #[test]
    fn cancel_keeps_original_confirmed_at() {
        let confirmed_at = Utc::now() - Duration::hours(3);
        let member = Confirmation {
            session_id: SessionId::new(),
            user_id: UserId::new(),
            confirmed: true,
            confirmed_at,
            updated_at: confirmed_at,
        };
        let mut r = roster(4, 1, Some(member.clone()));
        let events = execute(&mut r, &cmd(member.session_id, member.user_id, false)).unwrap();

        assert_eq!(events.len(), 1);
        let after = r.member().unwrap();
        assert!(!after.confirmed);
        assert_eq!(after.confirmed_at, confirmed_at);
        assert!(after.updated_at > confirmed_at);
        assert_eq!(r.confirmed_count(), 0);
    }

    #[test]
    fn rejects_command_for_other_session() {
        let r = roster(4, 0, None);
        let err = r.handle(&cmd(SessionId::new(), UserId::new(), true)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Any sequence of toggles by one user keeps the count within [0, capacity]
        /// and in step with the member's state.
        #[test]
        fn toggles_never_exceed_capacity(
            capacity in 1u32..20,
            others in 0u32..20,
            toggles in prop::collection::vec(any::<bool>(), 1..30),
        ) {
            let others = others.min(capacity);
            let mut r = roster(capacity, others, None);
            let session_id = *r.id();
            let user = UserId::new();

            for desired in toggles {
                match execute(&mut r, &cmd(session_id, user, desired)) {
                    Ok(_) => prop_assert_eq!(r.is_member_confirmed(), desired),
                    Err(DomainError::ClassFull { .. }) => {
                        prop_assert!(desired);
                        prop_assert_eq!(others, capacity);
                    }
                    Err(e) => prop_assert!(false, "unexpected error: {e:?}"),
                }
                prop_assert!(r.confirmed_count() <= capacity);
                let expected = others + u32::from(r.is_member_confirmed());
                prop_assert_eq!(r.confirmed_count(), expected);
            }
        }
    }
}
