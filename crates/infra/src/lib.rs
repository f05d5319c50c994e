//! Infrastructure layer: stores, configuration, notifications, and the confirmation
//! service that ties them together.

pub mod config;
pub mod confirmation_service;
pub mod notify;
pub mod seed;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::{AppConfig, ConfigError, DatabaseConfig, RetryPolicy, StorageConfig};
pub use confirmation_service::{ConfirmationService, ServiceError};
pub use notify::{
    AttendanceNotice, InMemoryNotifier, LogNotifier, NoticeClass, Notifier, NotifyError,
    PostgresNotifier,
};
pub use store::{
    ConfirmationLedger, InMemoryStore, Page, PageInfo, PageRequest, PostgresStore, ScheduleQueries,
    SessionCatalog, SessionFilter, StoreError,
};
