//! Abstract storage traits for Linkage.
//!
//! The resolver talks to storage only through a [`ContactTransaction`]:
//! every read and write of one resolution happens inside a single scoped
//! unit of work that either commits as a whole or leaves no trace.

use thiserror::Error;

use crate::contact::{Contact, ContactId, LinkPrecedence, NewContact};
use crate::error::ValidationError;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Contact not found.
    #[error("Contact not found: {0}")]
    ContactNotFound(ContactId),

    /// The record violates a storage-level constraint.
    #[error("Invalid record: {0}")]
    InvalidRecord(#[from] ValidationError),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Durable I/O failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// A link would not point a secondary straight at a live primary.
    #[error("Invalid link: {0}")]
    InvalidLink(String),

    /// Backend configuration rejected.
    #[error("Invalid storage configuration: {0}")]
    InvalidConfig(String),
}

/// A scoped, atomic unit of work against a contact store.
///
/// Dropping a transaction without calling [`commit`](Self::commit) rolls it
/// back. Queries only ever see records whose `deleted_at` is unset.
pub trait ContactTransaction {
    /// Contacts whose email or phone number equals the given value exactly,
    /// oldest first. Empty if neither argument is given.
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>, StorageError>;

    /// Every contact in the network(s) owning `seed_ids`, oldest first.
    ///
    /// Each seed is mapped to its owning primary id (itself if primary, else
    /// its `linked_id`); the result holds every record whose id is one of
    /// those primaries or whose `linked_id` points at one. Seeds spanning
    /// several networks yield records from all of them.
    fn find_linked_network(&self, seed_ids: &[ContactId]) -> Result<Vec<Contact>, StorageError>;

    /// Insert a new contact.
    ///
    /// # Errors
    /// - `InvalidRecord`: neither email nor phone number is present
    /// - `ContactNotFound`: the link target does not exist
    /// - `InvalidLink`: a secondary without a link, or linked to anything
    ///   but a live primary
    fn create(&mut self, contact: NewContact) -> Result<Contact, StorageError>;

    /// Rewrite a contact's precedence and link, bumping `updated_at`.
    ///
    /// Setting `Primary` always clears `linked_id`. Setting `Secondary`
    /// with no `linked_id` keeps the record's current link.
    ///
    /// # Errors
    /// - `ContactNotFound`: no live contact has this id
    /// - `InvalidLink`: the target is not a live primary, the record would
    ///   be a secondary without a link, or a demoted primary still has live
    ///   secondaries
    fn set_precedence(
        &mut self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> Result<Contact, StorageError>;

    /// Soft-delete a contact. Administrative only; the resolver never calls it.
    ///
    /// # Errors
    /// - `ContactNotFound`: no live contact has this id
    fn soft_delete(&mut self, id: ContactId) -> Result<Contact, StorageError>;

    /// Make every change of this transaction durable and visible.
    fn commit(self: Box<Self>) -> Result<(), StorageError>;

    /// Discard every change of this transaction.
    fn rollback(self: Box<Self>);
}

/// Storage trait for contact records.
///
/// # Isolation
/// A transaction holds the store's write lock for its whole lifetime, so
/// concurrent resolutions are serialized.
pub trait ContactStore: Send + Sync {
    /// Begin a transaction.
    fn begin(&self) -> Result<Box<dyn ContactTransaction + '_>, StorageError>;

    /// Get a live contact by ID.
    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError>;

    /// Every stored record, soft-deleted ones included, ascending by id.
    fn list_all(&self) -> Result<Vec<Contact>, StorageError>;

    /// Number of live records.
    fn count(&self) -> Result<usize, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure traits are object-safe
    fn _assert_contact_store_object_safe(_: &dyn ContactStore) {}
    fn _assert_contact_transaction_object_safe(_: &dyn ContactTransaction) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::ContactNotFound(ContactId::new(9));
        assert!(err.to_string().contains("Contact not found: 9"));

        let err = StorageError::BackendError("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));

        let err: StorageError = ValidationError::MissingIdentifier.into();
        assert!(err.to_string().contains("Invalid record"));
    }
}
