//! Value object trait: equality by value, not identity.

/// Marker trait for immutable values compared by their attributes.
///
/// A `Capacity` of 12 equals any other `Capacity` of 12; a `Session` with the same
/// attributes but a different id is a different session.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
