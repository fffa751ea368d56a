//! Low-level building blocks shared by the storage and chain layers.

/// Order-preserving and varint byte encodings.
pub mod bytes;

/// Per-edge lock table.
pub mod concurrency;
