//! Session storage and the confirmation ledger.
//!
//! - [`ConfirmationLedger`]: the serialized check-and-write for one (session, user) pair
//! - [`ScheduleQueries`]: read paths; counts are always derived from confirmation records
//! - [`SessionCatalog`]: seeding and admin inserts
//!
//! Two backends: [`InMemoryStore`] for tests/dev and [`PostgresStore`] for production.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use postgres::{PostgresOptions, PostgresStore};
pub use query::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, Page, PageInfo, PageRequest, SessionFilter};
pub use r#trait::{ConfirmationLedger, ScheduleQueries, SessionCatalog, StoreError};

use presenca_attendance::AttendanceEvent;

fn log_applied(events: &[AttendanceEvent]) {
    for event in events {
        tracing::debug!(
            event_type = event.event_type(),
            session_id = %event.session_id(),
            user_id = %event.user_id(),
            occurred_at = %event.occurred_at(),
            "attendance event applied"
        );
    }
}
