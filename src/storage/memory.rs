//! In-memory storage backend.
//!
//! Thread-safe, non-durable implementation of [`ContactStore`]. It is
//! intended for embedded usage, tests, and as a reference implementation.

use std::sync::{Arc, RwLock};

use crate::contact::{Contact, ContactId};
use crate::storage::table::{CommitSink, ContactMutation, ContactTable, TableTransaction};
use crate::storage::traits::{ContactStore, ContactTransaction, StorageError};
use crate::time::{Clock, SystemClock};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Commits are visible as soon as the write lock is released.
struct Volatile;

impl CommitSink for Volatile {
    fn persist(
        &self,
        _table: &ContactTable,
        _mutations: &[ContactMutation],
    ) -> Result<(), StorageError> {
        Ok(())
    }
}

static VOLATILE: Volatile = Volatile;

/// Thread-safe in-memory contact store.
#[derive(Debug)]
pub struct InMemoryContactStore {
    table: RwLock<ContactTable>,
    clock: Arc<dyn Clock>,
}

impl InMemoryContactStore {
    /// Create a new empty store stamped by the wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a new empty store stamped by `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            table: RwLock::new(ContactTable::default()),
            clock,
        }
    }
}

impl Default for InMemoryContactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContactStore for InMemoryContactStore {
    fn begin(&self) -> Result<Box<dyn ContactTransaction + '_>, StorageError> {
        let guard = self.table.write().map_err(|_| lock_err("contact.begin"))?;
        Ok(Box::new(TableTransaction::new(
            guard,
            self.clock.as_ref(),
            &VOLATILE,
        )))
    }

    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("contact.get"))?;
        Ok(table.get_live(id).cloned())
    }

    fn list_all(&self) -> Result<Vec<Contact>, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("contact.list_all"))?;
        Ok(table.all())
    }

    fn count(&self) -> Result<usize, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("contact.count"))?;
        Ok(table.live_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::{LinkPrecedence, NewContact};
    use crate::time::ManualClock;

    fn store() -> InMemoryContactStore {
        InMemoryContactStore::with_clock(Arc::new(ManualClock::default()))
    }

    #[test]
    fn test_create_assigns_monotonic_ids() {
        let store = store();
        let mut tx = store.begin().unwrap();
        let a = tx.create(NewContact::primary(Some("a@x.com"), None)).unwrap();
        let b = tx
            .create(NewContact::secondary(None, Some("111"), a.id))
            .unwrap();
        tx.commit().unwrap();

        assert_eq!(a.id, ContactId::new(1));
        assert_eq!(b.id, ContactId::new(2));
        assert!(a.created_at < b.created_at);
        assert_eq!(b.linked_id, Some(a.id));
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_create_requires_identifier() {
        let store = store();
        let mut tx = store.begin().unwrap();
        let err = tx.create(NewContact::primary(None, Some("   "))).unwrap_err();
        assert!(matches!(err, StorageError::InvalidRecord(_)));
    }

    #[test]
    fn test_create_rejects_unknown_link_target() {
        let store = store();
        let mut tx = store.begin().unwrap();
        let err = tx
            .create(NewContact::secondary(Some("a@x.com"), None, ContactId::new(77)))
            .unwrap_err();
        assert!(matches!(err, StorageError::ContactNotFound(id) if id == ContactId::new(77)));
    }

    #[test]
    fn test_secondary_cannot_link_to_secondary() {
        let store = store();
        let mut tx = store.begin().unwrap();
        let p = tx.create(NewContact::primary(Some("p@x.com"), Some("1"))).unwrap();
        let s1 = tx
            .create(NewContact::secondary(Some("s1@x.com"), Some("1"), p.id))
            .unwrap();

        let err = tx
            .create(NewContact::secondary(Some("s2@x.com"), None, s1.id))
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidLink(_)), "{err}");

        let other = tx.create(NewContact::primary(Some("o@x.com"), None)).unwrap();
        let err = tx
            .set_precedence(other.id, LinkPrecedence::Secondary, Some(s1.id))
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidLink(_)), "{err}");
        tx.commit().unwrap();

        let stored = store.get(other.id).unwrap().unwrap();
        assert!(stored.is_primary());
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_secondary_requires_link() {
        let store = store();
        let mut tx = store.begin().unwrap();
        let p = tx.create(NewContact::primary(Some("p@x.com"), None)).unwrap();

        let unlinked = NewContact {
            linked_id: None,
            ..NewContact::secondary(Some("s@x.com"), None, p.id)
        };
        assert!(matches!(
            tx.create(unlinked),
            Err(StorageError::InvalidLink(_))
        ));
        assert!(matches!(
            tx.set_precedence(p.id, LinkPrecedence::Secondary, None),
            Err(StorageError::InvalidLink(_))
        ));

        // An existing secondary keeps its link when none is given.
        let s = tx
            .create(NewContact::secondary(Some("s@x.com"), None, p.id))
            .unwrap();
        let kept = tx
            .set_precedence(s.id, LinkPrecedence::Secondary, None)
            .unwrap();
        assert_eq!(kept.linked_id, Some(p.id));
    }

    #[test]
    fn test_link_target_must_be_live() {
        let store = store();
        let mut tx = store.begin().unwrap();
        let p = tx.create(NewContact::primary(Some("p@x.com"), None)).unwrap();
        tx.soft_delete(p.id).unwrap();
        let err = tx
            .create(NewContact::secondary(Some("s@x.com"), None, p.id))
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidLink(_)), "{err}");
    }

    #[test]
    fn test_primary_with_secondaries_cannot_be_demoted() {
        let store = store();
        let mut tx = store.begin().unwrap();
        let p1 = tx.create(NewContact::primary(Some("a@x.com"), None)).unwrap();
        let p2 = tx.create(NewContact::primary(Some("b@x.com"), None)).unwrap();
        let s2 = tx
            .create(NewContact::secondary(Some("c@x.com"), None, p2.id))
            .unwrap();

        let err = tx
            .set_precedence(p2.id, LinkPrecedence::Secondary, Some(p1.id))
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidLink(_)), "{err}");

        // Moving the secondary first makes the demotion legal.
        tx.set_precedence(s2.id, LinkPrecedence::Secondary, Some(p1.id))
            .unwrap();
        let demoted = tx
            .set_precedence(p2.id, LinkPrecedence::Secondary, Some(p1.id))
            .unwrap();
        assert_eq!(demoted.linked_id, Some(p1.id));
        tx.commit().unwrap();
    }

    #[test]
    fn test_set_precedence_not_found() {
        let store = store();
        let mut tx = store.begin().unwrap();
        let err = tx
            .set_precedence(ContactId::new(5), LinkPrecedence::Primary, None)
            .unwrap_err();
        assert!(matches!(err, StorageError::ContactNotFound(_)));
    }

    #[test]
    fn test_set_precedence_bumps_updated_at() {
        let store = store();
        let mut tx = store.begin().unwrap();
        let p1 = tx.create(NewContact::primary(Some("a@x.com"), None)).unwrap();
        let p2 = tx.create(NewContact::primary(Some("b@x.com"), None)).unwrap();
        let demoted = tx
            .set_precedence(p2.id, LinkPrecedence::Secondary, Some(p1.id))
            .unwrap();
        tx.commit().unwrap();

        assert_eq!(demoted.linked_id, Some(p1.id));
        assert!(demoted.updated_at > p2.updated_at);
        assert_eq!(demoted.created_at, p2.created_at);

        let mut tx = store.begin().unwrap();
        let promoted = tx
            .set_precedence(p2.id, LinkPrecedence::Primary, Some(p1.id))
            .unwrap();
        assert_eq!(promoted.linked_id, None);
    }

    #[test]
    fn test_drop_rolls_back() {
        let store = store();
        {
            let mut tx = store.begin().unwrap();
            tx.create(NewContact::primary(Some("a@x.com"), None)).unwrap();
            // dropped without commit
        }
        assert_eq!(store.count().unwrap(), 0);

        // Ids freed by the rollback are handed out again.
        let mut tx = store.begin().unwrap();
        let c = tx.create(NewContact::primary(Some("b@x.com"), None)).unwrap();
        tx.commit().unwrap();
        assert_eq!(c.id, ContactId::new(1));
    }

    #[test]
    fn test_explicit_rollback_restores_updates() {
        let store = store();
        let mut tx = store.begin().unwrap();
        let p1 = tx.create(NewContact::primary(Some("a@x.com"), None)).unwrap();
        let p2 = tx.create(NewContact::primary(Some("b@x.com"), None)).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        tx.set_precedence(p2.id, LinkPrecedence::Secondary, Some(p1.id))
            .unwrap();
        tx.soft_delete(p1.id).unwrap();
        tx.rollback();

        assert_eq!(store.get(p1.id).unwrap(), Some(p1));
        assert_eq!(store.get(p2.id).unwrap(), Some(p2));
    }

    #[test]
    fn test_soft_delete_hides_record() {
        let store = store();
        let mut tx = store.begin().unwrap();
        let c = tx.create(NewContact::primary(Some("a@x.com"), None)).unwrap();
        tx.soft_delete(c.id).unwrap();
        assert!(tx.find_by_email_or_phone(Some("a@x.com"), None).unwrap().is_empty());
        assert!(matches!(
            tx.soft_delete(c.id),
            Err(StorageError::ContactNotFound(_))
        ));
        tx.commit().unwrap();

        assert_eq!(store.get(c.id).unwrap(), None);
        assert_eq!(store.count().unwrap(), 0);
        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_deleted());
    }
}
