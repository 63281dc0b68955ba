//! Demo data.
//!
//! Four small networks that exercise every shape the resolver handles:
//! multiple secondaries, a shared phone, a standalone primary, and
//! single-identifier secondaries.

use tracing::info;

use crate::contact::NewContact;
use crate::storage::{ContactStore, StorageError};

struct DemoNetwork {
    name: &'static str,
    primary: (&'static str, &'static str),
    secondaries: &'static [(Option<&'static str>, Option<&'static str>)],
}

const DEMO_NETWORKS: &[DemoNetwork] = &[
    DemoNetwork {
        name: "john",
        primary: ("john@example.com", "1234567890"),
        secondaries: &[
            (Some("john.doe@gmail.com"), Some("1234567890")),
            (Some("john.doe@gmail.com"), Some("1987654321")),
        ],
    },
    DemoNetwork {
        name: "jane",
        primary: ("jane@company.com", "1111111111"),
        secondaries: &[(Some("jane.smith@personal.com"), Some("1111111111"))],
    },
    DemoNetwork {
        name: "bob",
        primary: ("bob@example.com", "2222222222"),
        secondaries: &[],
    },
    DemoNetwork {
        name: "alice",
        primary: ("alice@work.com", "3333333333"),
        secondaries: &[(Some("alice@personal.com"), None), (None, Some("3333444444"))],
    },
];

/// Load the demo networks into an empty store.
///
/// Primaries are created first, then each network's secondaries, all in
/// one transaction. Returns the number of records created; a store that
/// already holds live records is left untouched and 0 is returned.
///
/// # Errors
/// Any storage error; nothing is written in that case.
pub fn seed_demo_contacts(store: &dyn ContactStore) -> Result<usize, StorageError> {
    if store.count()? > 0 {
        info!("contacts already exist; skipping demo seed");
        return Ok(0);
    }

    let mut tx = store.begin()?;
    let mut primaries = Vec::with_capacity(DEMO_NETWORKS.len());
    for network in DEMO_NETWORKS {
        let (email, phone) = network.primary;
        primaries.push(tx.create(NewContact::primary(Some(email), Some(phone)))?);
    }

    let mut created = primaries.len();
    for (network, primary) in DEMO_NETWORKS.iter().zip(&primaries) {
        for (email, phone) in network.secondaries {
            tx.create(NewContact::secondary(*email, *phone, primary.id))?;
            created += 1;
        }
        info!(network = network.name, primary_id = %primary.id, "seeded demo network");
    }
    tx.commit()?;

    info!(created, "demo contacts seeded");
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::{ContactId, LinkPrecedence};
    use crate::storage::InMemoryContactStore;

    #[test]
    fn test_seed_builds_four_networks() {
        let store = InMemoryContactStore::new();
        assert_eq!(seed_demo_contacts(&store).unwrap(), 9);

        let all = store.list_all().unwrap();
        let primaries: Vec<ContactId> = all
            .iter()
            .filter(|c| c.is_primary())
            .map(|c| c.id)
            .collect();
        assert_eq!(primaries, (1..=4).map(ContactId::new).collect::<Vec<_>>());

        let alice_phone_only = all
            .iter()
            .find(|c| c.phone_number.as_deref() == Some("3333444444"))
            .unwrap();
        assert_eq!(alice_phone_only.link_precedence, LinkPrecedence::Secondary);
        assert_eq!(alice_phone_only.linked_id, Some(ContactId::new(4)));
        assert_eq!(alice_phone_only.email, None);
    }

    #[test]
    fn test_seed_skips_populated_store() {
        let store = InMemoryContactStore::new();
        seed_demo_contacts(&store).unwrap();
        assert_eq!(seed_demo_contacts(&store).unwrap(), 0);
        assert_eq!(store.count().unwrap(), 9);
    }
}
