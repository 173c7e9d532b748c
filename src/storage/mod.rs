//! Storage layer for source trust state.
//!
//! In-memory backend for tests and embedded use; a durable append-only
//! backend behind the `persistent` feature.

mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryTrustStore;
pub use traits::{StorageError, TrustStore};

#[cfg(feature = "persistent")]
pub use persistent::FileTrustStore;
