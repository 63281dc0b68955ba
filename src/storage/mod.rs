//! Contact record storage.
//!
//! [`ContactStore`] and [`ContactTransaction`] define the contract the
//! resolver consumes. Two backends implement it: [`InMemoryContactStore`]
//! and, with the `persistent` feature, a WAL-backed store.

mod memory;
mod table;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryContactStore;
pub use table::ContactMutation;
pub use traits::{ContactStore, ContactTransaction, StorageError};

#[cfg(feature = "persistent")]
pub use persistent::{open_database, PersistentConfig, PersistentContactStore};
