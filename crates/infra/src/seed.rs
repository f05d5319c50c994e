//! Default weekly schedule.

use chrono::{DateTime, Utc};

use presenca_attendance::NewSession;
use presenca_core::SessionId;

use crate::store::{ScheduleQueries, SessionCatalog, StoreError};

const CENTRAL: &str = "Quadra Central";
const LATERAL: &str = "Quadra Lateral";

/// (day, time, instructor, location, max participants)
const WEEKLY_SLOTS: &[(&str, &str, &str, &str, u32)] = &[
    ("Segunda", "8:30", "João Silva", CENTRAL, 16),
    ("Segunda", "17:00", "Maria Oliveira", CENTRAL, 16),
    ("Segunda", "18:30", "Pedro Santos", CENTRAL, 16),
    ("Segunda", "20:00", "Carlos Ferreira", LATERAL, 12),
    ("Terça", "6:30", "Ana Costa", LATERAL, 12),
    ("Terça", "8:00", "João Silva", CENTRAL, 16),
    ("Terça", "12:00", "Pedro Santos", CENTRAL, 16),
    ("Terça", "17:00", "Maria Oliveira", CENTRAL, 16),
    ("Terça", "18:30", "Carlos Ferreira", CENTRAL, 16),
    ("Terça", "20:00", "Ana Costa", LATERAL, 12),
    ("Quarta", "8:30", "João Silva", CENTRAL, 16),
    ("Quarta", "17:00", "Maria Oliveira", CENTRAL, 16),
    ("Quarta", "18:30", "Pedro Santos", CENTRAL, 16),
    ("Quarta", "20:00", "Carlos Ferreira", LATERAL, 12),
    ("Quinta", "6:30", "Ana Costa", LATERAL, 12),
    ("Quinta", "8:00", "João Silva", CENTRAL, 16),
    ("Quinta", "12:00", "Pedro Santos", CENTRAL, 16),
    ("Quinta", "17:00", "Maria Oliveira", CENTRAL, 16),
    ("Quinta", "18:30", "Carlos Ferreira", CENTRAL, 16),
    ("Quinta", "20:00", "Ana Costa", LATERAL, 12),
];

pub fn weekly_schedule() -> Vec<NewSession> {
    WEEKLY_SLOTS
        .iter()
        .map(|&(day, time, instructor, location, max)| NewSession {
            title: Some("Futevôlei".to_string()),
            description: None,
            day: day.to_string(),
            time: time.to_string(),
            date: None,
            location: location.to_string(),
            instructor: instructor.to_string(),
            max_participants: max,
        })
        .collect()
}

/// Insert the weekly schedule unless the store already has sessions.
///
/// Returns the number of sessions inserted.
pub async fn seed_schedule(
    catalog: &dyn SessionCatalog,
    queries: &dyn ScheduleQueries,
    now: DateTime<Utc>,
) -> Result<usize, StoreError> {
    if !queries.all_sessions().await?.is_empty() {
        tracing::info!("schedule already present; skipping seed");
        return Ok(0);
    }

    let schedule = weekly_schedule();
    let count = schedule.len();
    for new in schedule {
        let session = new.validate(SessionId::new(), now)?;
        catalog.insert_session(&session).await?;
    }
    tracing::info!(sessions = count, "seeded weekly schedule");
    Ok(count)
}
