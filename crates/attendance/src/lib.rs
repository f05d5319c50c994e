//! Attendance domain: class sessions, per-user confirmations and the capacity rule.
//!
//! Pure, deterministic logic only (no IO, no HTTP, no storage). Stores load state,
//! ask [`SessionRoster`] for a decision, and persist the result.

pub mod profile;
pub mod ranking;
pub mod roster;
pub mod session;
pub mod stats;
pub mod views;
pub mod weekday;

pub use profile::UserProfile;
pub use ranking::{rank_next_sessions, RankedSession, SchedulePreferences};
pub use roster::{
    AttendanceCancelled, AttendanceConfirmed, AttendanceEvent, AttendanceOutcome, Confirmation,
    SessionRoster, SetAttendance,
};
pub use session::{Capacity, NewSession, Session, TimeSlot};
pub use stats::{DayFrequency, TimeFrequency, UserStats};
pub use views::{ConfirmedSession, HistoryEntry, HistoryStatus, Participant, SessionDetail, SessionSummary};
pub use weekday::{parse_weekday, portuguese_name};
