//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attributes. A material
/// signature is the canonical example here: two recipes listing the same lots in
/// the same quantities are the same recipe, whatever order they were typed in.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
