//! `presenca-core`: domain foundation building blocks.
//!
//! Pure domain primitives shared by every crate (no IO, no infrastructure).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{execute, Aggregate, AggregateRoot};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{SessionId, UserId};
pub use value_object::ValueObject;
