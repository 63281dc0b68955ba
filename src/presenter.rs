//! External identity shape.
//!
//! Turns a resolved (primary, network) pair into the consolidated view
//! callers receive. Pure; no store access.

use serde::{Deserialize, Serialize};

use crate::contact::{Contact, ContactId, LinkPrecedence};

/// Consolidated identity of one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactIdentity {
    /// Id of the network primary.
    pub primary_contact_id: ContactId,
    /// Unique emails, primary's first.
    pub emails: Vec<String>,
    /// Unique phone numbers, primary's first.
    pub phone_numbers: Vec<String>,
    /// Ids of all secondary members.
    pub secondary_contact_ids: Vec<ContactId>,
}

/// Envelope returned by the identify operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    /// The consolidated identity.
    pub contact: ContactIdentity,
}

fn unique_with_first<'a>(
    values: impl Iterator<Item = &'a str>,
    first: Option<&str>,
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        if !out.iter().any(|seen| seen == value) {
            out.push(value.to_string());
        }
    }
    if let Some(first) = first {
        if let Some(pos) = out.iter().position(|v| v == first) {
            let value = out.remove(pos);
            out.insert(0, value);
        }
    }
    out
}

/// Format a network as a [`ContactIdentity`].
///
/// `network` is expected in ascending creation order; that order decides
/// the position of every value except the primary's own, which is moved
/// to the front.
#[must_use]
pub fn format(primary: &Contact, network: &[Contact]) -> ContactIdentity {
    let emails = unique_with_first(
        network.iter().filter_map(|c| c.email.as_deref()),
        primary.email.as_deref(),
    );
    let phone_numbers = unique_with_first(
        network.iter().filter_map(|c| c.phone_number.as_deref()),
        primary.phone_number.as_deref(),
    );
    let secondary_contact_ids = network
        .iter()
        .filter(|c| c.id != primary.id && c.link_precedence == LinkPrecedence::Secondary)
        .map(|c| c.id)
        .collect();

    ContactIdentity {
        primary_contact_id: primary.id,
        emails,
        phone_numbers,
        secondary_contact_ids,
    }
}
