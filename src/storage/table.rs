//! Indexed contact table and the transaction type shared by all backends.
//!
//! Backends differ only in what happens at commit time: the in-memory
//! store keeps nothing, the persistent store appends the transaction's
//! journal to its write-ahead log. Everything else (indexes, the two
//! network queries, undo on rollback) lives here.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::RwLockWriteGuard;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::contact::{Contact, ContactId, LinkPrecedence, NewContact};
use crate::error::ValidationError;
use crate::storage::traits::{ContactTransaction, StorageError};
use crate::time::Clock;

/// A committed change to a single record, as replayed from durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactMutation {
    /// A newly created record.
    Insert(Contact),
    /// The post-image of a modified record.
    Update(Contact),
}

#[derive(Debug, Default, Clone)]
pub(crate) struct ContactTable {
    by_id: BTreeMap<ContactId, Contact>,
    by_email: HashMap<String, BTreeSet<ContactId>>,
    by_phone: HashMap<String, BTreeSet<ContactId>>,
    by_linked: HashMap<ContactId, BTreeSet<ContactId>>,
    last_id: u64,
}

fn add_key<K: Eq + Hash>(index: &mut HashMap<K, BTreeSet<ContactId>>, key: K, id: ContactId) {
    index.entry(key).or_default().insert(id);
}

fn drop_key<K: Eq + Hash>(index: &mut HashMap<K, BTreeSet<ContactId>>, key: &K, id: ContactId) {
    if let Some(set) = index.get_mut(key) {
        set.remove(&id);
        if set.is_empty() {
            index.remove(key);
        }
    }
}

impl ContactTable {
    #[cfg_attr(not(feature = "persistent"), allow(dead_code))]
    pub(crate) fn from_snapshot(contacts: Vec<Contact>, last_id: u64) -> Self {
        let mut table = Self::default();
        for contact in contacts {
            table.put(contact);
        }
        table.last_id = table.last_id.max(last_id);
        table
    }

    #[cfg_attr(not(feature = "persistent"), allow(dead_code))]
    pub(crate) fn snapshot(&self) -> Vec<Contact> {
        self.by_id.values().cloned().collect()
    }

    #[cfg_attr(not(feature = "persistent"), allow(dead_code))]
    pub(crate) const fn last_id(&self) -> u64 {
        self.last_id
    }

    fn index(&mut self, contact: &Contact) {
        if let Some(email) = &contact.email {
            add_key(&mut self.by_email, email.clone(), contact.id);
        }
        if let Some(phone) = &contact.phone_number {
            add_key(&mut self.by_phone, phone.clone(), contact.id);
        }
        if let Some(linked) = contact.linked_id {
            add_key(&mut self.by_linked, linked, contact.id);
        }
    }

    fn unindex(&mut self, contact: &Contact) {
        if let Some(email) = &contact.email {
            drop_key(&mut self.by_email, email, contact.id);
        }
        if let Some(phone) = &contact.phone_number {
            drop_key(&mut self.by_phone, phone, contact.id);
        }
        if let Some(linked) = contact.linked_id {
            drop_key(&mut self.by_linked, &linked, contact.id);
        }
    }

    /// Store `contact`, replacing and returning any previous version.
    fn put(&mut self, contact: Contact) -> Option<Contact> {
        let prev = self.remove(contact.id);
        self.last_id = self.last_id.max(contact.id.get());
        self.index(&contact);
        self.by_id.insert(contact.id, contact);
        prev
    }

    fn remove(&mut self, id: ContactId) -> Option<Contact> {
        let prev = self.by_id.remove(&id)?;
        self.unindex(&prev);
        Some(prev)
    }

    /// Apply a committed mutation (WAL replay).
    #[cfg_attr(not(feature = "persistent"), allow(dead_code))]
    pub(crate) fn apply(&mut self, mutation: &ContactMutation) -> Result<(), StorageError> {
        match mutation {
            ContactMutation::Insert(contact) => {
                if self.by_id.contains_key(&contact.id) {
                    return Err(StorageError::DuplicateKey(contact.id.to_string()));
                }
                self.put(contact.clone());
            }
            ContactMutation::Update(contact) => {
                if !self.by_id.contains_key(&contact.id) {
                    return Err(StorageError::ContactNotFound(contact.id));
                }
                self.put(contact.clone());
            }
        }
        Ok(())
    }

    pub(crate) fn get_live(&self, id: ContactId) -> Option<&Contact> {
        self.by_id.get(&id).filter(|c| !c.is_deleted())
    }

    pub(crate) fn all(&self) -> Vec<Contact> {
        self.by_id.values().cloned().collect()
    }

    /// Live records whose `linked_id` is `id`.
    pub(crate) fn live_dependents(&self, id: ContactId) -> usize {
        self.by_linked.get(&id).map_or(0, |linked| {
            linked
                .iter()
                .filter(|d| self.get_live(**d).is_some())
                .count()
        })
    }

    pub(crate) fn live_count(&self) -> usize {
        self.by_id.values().filter(|c| !c.is_deleted()).count()
    }

    fn collect_live(&self, ids: &BTreeSet<ContactId>) -> Vec<Contact> {
        let mut out: Vec<Contact> = ids
            .iter()
            .filter_map(|id| self.get_live(*id).cloned())
            .collect();
        out.sort_by(Contact::age_order);
        out
    }

    pub(crate) fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Vec<Contact> {
        let mut ids = BTreeSet::new();
        if let Some(set) = email.and_then(|e| self.by_email.get(e)) {
            ids.extend(set.iter().copied());
        }
        if let Some(set) = phone_number.and_then(|p| self.by_phone.get(p)) {
            ids.extend(set.iter().copied());
        }
        self.collect_live(&ids)
    }

    pub(crate) fn find_linked_network(&self, seed_ids: &[ContactId]) -> Vec<Contact> {
        let primaries: BTreeSet<ContactId> = seed_ids
            .iter()
            .filter_map(|id| self.get_live(*id))
            .map(Contact::effective_primary_id)
            .collect();

        let mut members = BTreeSet::new();
        for primary in &primaries {
            members.insert(*primary);
            if let Some(linked) = self.by_linked.get(primary) {
                members.extend(linked.iter().copied());
            }
        }
        self.collect_live(&members)
    }
}

/// What a backend does with a transaction's journal at commit time.
pub(crate) trait CommitSink: Sync {
    /// Persist `mutations`. `table` already reflects them.
    ///
    /// On error the transaction is rolled back.
    fn persist(&self, table: &ContactTable, mutations: &[ContactMutation])
        -> Result<(), StorageError>;
}

enum Undo {
    Remove(ContactId),
    Restore(Contact),
}

/// Transaction over a [`ContactTable`] held under its write lock.
///
/// Writes are applied eagerly and recorded in an undo log; nobody else can
/// observe them until the guard is released.
pub(crate) struct TableTransaction<'a> {
    table: RwLockWriteGuard<'a, ContactTable>,
    clock: &'a dyn Clock,
    sink: &'a dyn CommitSink,
    journal: Vec<ContactMutation>,
    undo: Vec<Undo>,
    last_id_at_begin: u64,
    finished: bool,
}

impl<'a> TableTransaction<'a> {
    pub(crate) fn new(
        table: RwLockWriteGuard<'a, ContactTable>,
        clock: &'a dyn Clock,
        sink: &'a dyn CommitSink,
    ) -> Self {
        let last_id_at_begin = table.last_id;
        Self {
            table,
            clock,
            sink,
            journal: Vec::new(),
            undo: Vec::new(),
            last_id_at_begin,
            finished: false,
        }
    }

    fn live(&self, id: ContactId) -> Result<Contact, StorageError> {
        self.table
            .get_live(id)
            .cloned()
            .ok_or(StorageError::ContactNotFound(id))
    }

    fn ensure_link_target(&self, id: ContactId, linked: ContactId) -> Result<(), StorageError> {
        if id == linked {
            return Err(StorageError::InvalidLink(format!(
                "contact {id} cannot be linked to itself"
            )));
        }
        match self.table.by_id.get(&linked) {
            None => Err(StorageError::ContactNotFound(linked)),
            Some(target) if target.is_deleted() || !target.is_primary() => {
                Err(StorageError::InvalidLink(format!(
                    "contact {id} cannot be linked to {linked}: not a live primary"
                )))
            }
            Some(_) => Ok(()),
        }
    }

    fn ensure_no_dependents(&self, id: ContactId) -> Result<(), StorageError> {
        match self.table.live_dependents(id) {
            0 => Ok(()),
            n => Err(StorageError::InvalidLink(format!(
                "contact {id} still has {n} linked secondaries"
            ))),
        }
    }

    fn write(&mut self, contact: Contact) {
        if let Some(prev) = self.table.put(contact.clone()) {
            self.undo.push(Undo::Restore(prev));
        }
        self.journal.push(ContactMutation::Update(contact));
    }

    fn undo_all(&mut self) {
        let steps = self.undo.len();
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Remove(id) => {
                    self.table.remove(id);
                }
                Undo::Restore(prev) => {
                    self.table.put(prev);
                }
            }
        }
        self.table.last_id = self.last_id_at_begin;
        self.journal.clear();
        if steps > 0 {
            debug!(steps, "rolled back contact transaction");
        }
    }
}

impl ContactTransaction for TableTransaction<'_> {
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>, StorageError> {
        Ok(self.table.find_by_email_or_phone(email, phone_number))
    }

    fn find_linked_network(&self, seed_ids: &[ContactId]) -> Result<Vec<Contact>, StorageError> {
        Ok(self.table.find_linked_network(seed_ids))
    }

    fn create(&mut self, contact: NewContact) -> Result<Contact, StorageError> {
        if contact.is_empty() {
            return Err(ValidationError::MissingIdentifier.into());
        }

        let id = ContactId::new(self.table.last_id + 1);
        let linked_id = match (contact.link_precedence, contact.linked_id) {
            (LinkPrecedence::Primary, _) => None,
            (LinkPrecedence::Secondary, Some(linked)) => {
                self.ensure_link_target(id, linked)?;
                Some(linked)
            }
            (LinkPrecedence::Secondary, None) => {
                return Err(StorageError::InvalidLink(
                    "a secondary contact needs a primary to link to".to_string(),
                ));
            }
        };

        let now = self.clock.now();
        let created = Contact {
            id,
            email: contact.email,
            phone_number: contact.phone_number,
            link_precedence: contact.link_precedence,
            linked_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        self.table.put(created.clone());
        self.undo.push(Undo::Remove(id));
        self.journal.push(ContactMutation::Insert(created.clone()));
        debug!(contact_id = %id, precedence = %created.link_precedence, "created contact");
        Ok(created)
    }

    fn set_precedence(
        &mut self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> Result<Contact, StorageError> {
        let mut contact = self.live(id)?;
        match precedence {
            LinkPrecedence::Primary => contact.linked_id = None,
            LinkPrecedence::Secondary => {
                if contact.is_primary() {
                    self.ensure_no_dependents(id)?;
                }
                if let Some(linked) = linked_id {
                    self.ensure_link_target(id, linked)?;
                    contact.linked_id = Some(linked);
                } else if contact.linked_id.is_none() {
                    return Err(StorageError::InvalidLink(format!(
                        "secondary contact {id} needs a primary to link to"
                    )));
                }
            }
        }
        contact.link_precedence = precedence;
        contact.updated_at = self.clock.now();

        self.write(contact.clone());
        debug!(contact_id = %id, %precedence, linked_id = ?contact.linked_id, "updated link precedence");
        Ok(contact)
    }

    fn soft_delete(&mut self, id: ContactId) -> Result<Contact, StorageError> {
        let mut contact = self.live(id)?;
        let now = self.clock.now();
        contact.deleted_at = Some(now);
        contact.updated_at = now;

        self.write(contact.clone());
        debug!(contact_id = %id, "soft-deleted contact");
        Ok(contact)
    }

    fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        if !self.journal.is_empty() {
            let sink = self.sink;
            if let Err(err) = sink.persist(&self.table, &self.journal) {
                self.undo_all();
                self.finished = true;
                return Err(err);
            }
            debug!(mutations = self.journal.len(), "committed contact transaction");
        }
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) {
        self.undo_all();
        self.finished = true;
    }
}

impl Drop for TableTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.undo_all();
        }
    }
}
