//! Identity resolution.
//!
//! Given a submitted (email, phone number) pair, the resolver finds every
//! record transitively connected to it, settles on one primary, folds every
//! other connected record under that primary, and records the submission as
//! a new secondary when it carries information the network lacks.
//!
//! # Steps
//!
//! 1. Seed lookup by exact email / phone match. No match: new primary, done.
//! 2. Expand seeds to the full membership of every network they touch.
//! 3. Partition the expansion by effective primary id. Partitions without a
//!    live primary (orphans) fold into the surviving network.
//! 4. Several primaries: keep the oldest (ties: smallest id), demote the rest.
//!    No live primary at all: promote the oldest record.
//! 5. Unless networks were merged, create a secondary for new information.
//! 6. Repair any member not linked directly to the final primary.
//!
//! All of it runs in one [`ContactTransaction`]; any failure rolls back.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{Identifiers, ResolverConfig};
use crate::contact::{Contact, ContactId, LinkPrecedence, NewContact};
use crate::error::IdentityResult;
use crate::presenter::{self, ContactIdentity};
use crate::storage::{ContactStore, ContactTransaction, StorageError};

/// Inbound identify request.
///
/// Deserializes from `{"email": "...", "phoneNumber": "..."}`; either field
/// may be missing or null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    /// Submitted email.
    #[serde(default)]
    pub email: Option<String>,
    /// Submitted phone number.
    #[serde(default)]
    pub phone_number: Option<String>,
}

impl IdentifyRequest {
    /// Builds a request from optional identifiers.
    #[must_use]
    pub fn new(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
        }
    }
}

/// Outcome of one resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Correlation id of the request (also on its log span).
    pub request_id: Uuid,
    /// The network primary after resolution.
    pub primary: Contact,
    /// Every network member, primary included, oldest first.
    pub network: Vec<Contact>,
    /// Record created for this submission, if any.
    pub created: Option<ContactId>,
    /// Former primaries demoted by a network merge.
    pub demoted: Vec<ContactId>,
    /// Record promoted to primary because the network had none.
    pub promoted: Option<ContactId>,
    /// Records whose link was rewritten to the final primary.
    pub relinked: Vec<ContactId>,
}

impl Resolution {
    /// The externally visible identity.
    #[must_use]
    pub fn identity(&self) -> ContactIdentity {
        presenter::format(&self.primary, &self.network)
    }

    /// Returns true if separate networks were merged.
    #[must_use]
    pub fn merged(&self) -> bool {
        !self.demoted.is_empty()
    }
}

/// Resolves submitted identifiers against a [`ContactStore`].
///
/// Holds no per-request state; share it behind an `Arc`.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn ContactStore>,
    config: ResolverConfig,
}

impl IdentityResolver {
    /// Create a resolver with default limits.
    #[must_use]
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        Self::with_config(store, ResolverConfig::default())
    }

    /// Create a resolver with explicit limits.
    #[must_use]
    pub fn with_config(store: Arc<dyn ContactStore>, config: ResolverConfig) -> Self {
        Self { store, config }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ContactStore> {
        &self.store
    }

    /// Resolve `(email, phone_number)` to its canonical network.
    ///
    /// # Errors
    /// - `Validation` if both identifiers are absent or blank, or too long
    /// - `Storage` for any store failure; the transaction is rolled back
    pub fn resolve(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> IdentityResult<Resolution> {
        let identifiers = self.config.check(email, phone_number)?;
        let request_id = Uuid::new_v4();
        let span = info_span!("resolve", %request_id);
        let _enter = span.enter();

        let mut tx = self.store.begin()?;
        let resolution = consolidate(&mut *tx, identifiers, request_id)?;
        tx.commit()?;

        info!(
            primary_id = %resolution.primary.id,
            members = resolution.network.len(),
            created = ?resolution.created,
            merged = resolution.merged(),
            "resolved contact identity"
        );
        Ok(resolution)
    }

    /// Resolve a request and format the result.
    ///
    /// # Errors
    /// Same as [`resolve`](Self::resolve).
    pub fn identify(&self, request: &IdentifyRequest) -> IdentityResult<ContactIdentity> {
        self.resolve(request.email.as_deref(), request.phone_number.as_deref())
            .map(|r| r.identity())
    }
}

/// Group records by the primary that owns them, preserving order.
fn partition(records: &[Contact]) -> BTreeMap<ContactId, Vec<Contact>> {
    let mut networks: BTreeMap<ContactId, Vec<Contact>> = BTreeMap::new();
    for record in records {
        networks
            .entry(record.effective_primary_id())
            .or_default()
            .push(record.clone());
    }
    networks
}

fn introduces_new_information(
    network: &[Contact],
    email: Option<&str>,
    phone_number: Option<&str>,
) -> bool {
    match (email, phone_number) {
        (Some(e), Some(p)) => !network
            .iter()
            .any(|c| c.has_email(e) && c.has_phone_number(p)),
        (Some(e), None) => !network.iter().any(|c| c.has_email(e)),
        (None, Some(p)) => !network.iter().any(|c| c.has_phone_number(p)),
        (None, None) => false,
    }
}

fn replace_member(network: &mut [Contact], updated: Contact) {
    if let Some(slot) = network.iter_mut().find(|c| c.id == updated.id) {
        *slot = updated;
    }
}

/// Point every secondary member directly at `primary`.
///
/// Other primaries are left alone; they are demoted explicitly.
fn relink_members<T: ContactTransaction + ?Sized>(
    tx: &mut T,
    network: &mut [Contact],
    primary: ContactId,
    relinked: &mut Vec<ContactId>,
) -> Result<(), StorageError> {
    for member in network.iter_mut() {
        if member.is_primary() || member.is_linked_to(primary) {
            continue;
        }
        *member = tx.set_precedence(member.id, LinkPrecedence::Secondary, Some(primary))?;
        relinked.push(member.id);
    }
    Ok(())
}

fn consolidate<T: ContactTransaction + ?Sized>(
    tx: &mut T,
    identifiers: Identifiers<'_>,
    request_id: Uuid,
) -> Result<Resolution, StorageError> {
    let Identifiers {
        email,
        phone_number,
    } = identifiers;

    let seeds = tx.find_by_email_or_phone(email, phone_number)?;
    if seeds.is_empty() {
        let primary = tx.create(NewContact::primary(email, phone_number))?;
        debug!(contact_id = %primary.id, "no existing contact matched; created primary");
        return Ok(Resolution {
            request_id,
            created: Some(primary.id),
            network: vec![primary.clone()],
            primary,
            demoted: Vec::new(),
            promoted: None,
            relinked: Vec::new(),
        });
    }

    let seed_ids: Vec<ContactId> = seeds.iter().map(|c| c.id).collect();
    let expanded = tx.find_linked_network(&seed_ids)?;
    let partitions = partition(&expanded);
    // Only keys held by a live primary own a network. The rest are orphaned
    // partitions and fold into whichever primary wins.
    let mut primaries: Vec<Contact> = partitions
        .keys()
        .filter_map(|id| expanded.iter().find(|c| c.id == *id && c.is_primary()))
        .cloned()
        .collect();
    primaries.sort_by(Contact::age_order);
    let orphaned = partitions.len() - primaries.len();
    debug!(
        seeds = seeds.len(),
        expanded = expanded.len(),
        networks = primaries.len(),
        orphaned,
        "expanded matched contacts"
    );

    let merged = primaries.len() > 1;
    let mut primary = match primaries.first() {
        Some(oldest) => oldest.clone(),
        None => {
            let oldest = expanded
                .iter()
                .min_by(|a, b| a.age_order(b))
                .cloned()
                .ok_or_else(|| {
                    StorageError::BackendError(
                        "network expansion lost the matched contacts".to_string(),
                    )
                })?;
            warn!(
                contact_id = %oldest.id,
                "matched contacts have no reachable primary; promoting oldest record"
            );
            oldest
        }
    };
    let mut network = expanded;

    let mut promoted = None;
    if !primary.is_primary() || primary.linked_id.is_some() {
        primary = tx.set_precedence(primary.id, LinkPrecedence::Primary, None)?;
        replace_member(&mut network, primary.clone());
        promoted = Some(primary.id);
    } else if orphaned > 0 {
        warn!(
            primary_id = %primary.id,
            orphaned,
            "folding orphaned contacts into the surviving network"
        );
    }

    // Secondaries move before their old primaries are demoted, so a demoted
    // record never has anything linked to it.
    let mut relinked = Vec::new();
    relink_members(tx, &mut network, primary.id, &mut relinked)?;

    let mut demoted = Vec::new();
    for other in primaries.iter().skip(1) {
        let updated = tx.set_precedence(other.id, LinkPrecedence::Secondary, Some(primary.id))?;
        replace_member(&mut network, updated);
        demoted.push(other.id);
    }
    if merged {
        info!(
            primary_id = %primary.id,
            demoted = ?demoted,
            "merged contact networks"
        );
    }

    // A merge only happens when both identifiers already matched, so it
    // never carries new information.
    let mut created = None;
    if !merged && introduces_new_information(&network, email, phone_number) {
        let record = tx.create(NewContact::secondary(email, phone_number, primary.id))?;
        debug!(contact_id = %record.id, primary_id = %primary.id, "linked new secondary contact");
        created = Some(record.id);
        network.push(record);
    }

    let repaired_from = relinked.len();
    relink_members(tx, &mut network, primary.id, &mut relinked)?;
    if relinked.len() > repaired_from {
        warn!(
            repaired = ?&relinked[repaired_from..],
            "repaired contacts not linked to their primary"
        );
    }

    Ok(Resolution {
        request_id,
        primary,
        network,
        created,
        demoted,
        promoted,
        relinked,
    })
}
