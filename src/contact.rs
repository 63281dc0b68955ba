//! Contact records and link precedence.
//!
//! A contact is one observed (email, phone number) pair. Contacts that
//! belong to the same person form a network: exactly one primary record
//! plus any number of secondary records pointing at it via `linked_id`.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonically assigned surrogate key of a contact record.
///
/// Ids are allocated by the store in creation order and never reused.
///
/// # Examples
///
/// ```
/// use linkage::ContactId;
///
/// let id = ContactId::new(7);
/// assert_eq!(id.get(), 7);
/// assert_eq!(id.to_string(), "7");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(u64);

impl ContactId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ContactId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Role of a record inside its network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPrecedence {
    /// The authoritative record of a network.
    Primary,
    /// A record folded into a primary's identity.
    Secondary,
}

impl fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// A stored contact record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Surrogate key.
    pub id: ContactId,
    /// Email address, matched exactly.
    pub email: Option<String>,
    /// Phone number, matched exactly.
    pub phone_number: Option<String>,
    /// Primary or secondary.
    pub link_precedence: LinkPrecedence,
    /// The network primary; `None` iff this record is primary.
    pub linked_id: Option<ContactId>,
    /// Creation time; the primacy tie-break key.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker. Deleted records are invisible to queries.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Contact {
    /// Returns true if this record is a primary.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// Returns true if this record has been soft-deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The id of the primary this record belongs to.
    ///
    /// A primary owns itself. A secondary without a `linked_id` is an
    /// anomaly and is treated as its own owner.
    #[must_use]
    pub fn effective_primary_id(&self) -> ContactId {
        match (self.link_precedence, self.linked_id) {
            (LinkPrecedence::Primary, _) | (LinkPrecedence::Secondary, None) => self.id,
            (LinkPrecedence::Secondary, Some(linked)) => linked,
        }
    }

    /// Returns true if this record is a secondary correctly linked to `primary`.
    #[must_use]
    pub fn is_linked_to(&self, primary: ContactId) -> bool {
        self.link_precedence == LinkPrecedence::Secondary && self.linked_id == Some(primary)
    }

    /// Returns true if the record carries exactly this email.
    #[must_use]
    pub fn has_email(&self, email: &str) -> bool {
        self.email.as_deref() == Some(email)
    }

    /// Returns true if the record carries exactly this phone number.
    #[must_use]
    pub fn has_phone_number(&self, phone_number: &str) -> bool {
        self.phone_number.as_deref() == Some(phone_number)
    }

    /// Network ordering: oldest first, ties broken by smallest id.
    #[must_use]
    pub fn age_order(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Insert request for a new contact record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    /// Email address.
    pub email: Option<String>,
    /// Phone number.
    pub phone_number: Option<String>,
    /// Primary the new record is linked to (secondaries only).
    pub linked_id: Option<ContactId>,
    /// Precedence of the new record.
    pub link_precedence: LinkPrecedence,
}

impl NewContact {
    /// A new primary record.
    #[must_use]
    pub fn primary(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: non_blank(email),
            phone_number: non_blank(phone_number),
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
        }
    }

    /// A new secondary record linked to `primary`.
    #[must_use]
    pub fn secondary(email: Option<&str>, phone_number: Option<&str>, primary: ContactId) -> Self {
        Self {
            email: non_blank(email),
            phone_number: non_blank(phone_number),
            linked_id: Some(primary),
            link_precedence: LinkPrecedence::Secondary,
        }
    }

    /// Returns true if neither identifier is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.phone_number.is_none()
    }
}

/// Treats empty and whitespace-only identifiers as absent.
///
/// Non-blank values are kept verbatim; matching is exact.
#[must_use]
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(id: u64, precedence: LinkPrecedence, linked: Option<u64>) -> Contact {
        let now = Utc::now();
        Contact {
            id: ContactId::new(id),
            email: Some(format!("c{id}@example.com")),
            phone_number: None,
            link_precedence: precedence,
            linked_id: linked.map(ContactId::new),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_effective_primary_id() {
        assert_eq!(
            contact(1, LinkPrecedence::Primary, None).effective_primary_id(),
            ContactId::new(1)
        );
        assert_eq!(
            contact(2, LinkPrecedence::Secondary, Some(1)).effective_primary_id(),
            ContactId::new(1)
        );
        // Orphaned secondary falls back to itself.
        assert_eq!(
            contact(3, LinkPrecedence::Secondary, None).effective_primary_id(),
            ContactId::new(3)
        );
    }

    #[test]
    fn test_is_linked_to() {
        let c = contact(2, LinkPrecedence::Secondary, Some(1));
        assert!(c.is_linked_to(ContactId::new(1)));
        assert!(!c.is_linked_to(ContactId::new(5)));
        assert!(!contact(1, LinkPrecedence::Primary, None).is_linked_to(ContactId::new(1)));
    }

    #[test]
    fn test_age_order_ties_break_on_id() {
        let a = contact(1, LinkPrecedence::Primary, None);
        let mut b = contact(2, LinkPrecedence::Primary, None);
        b.created_at = a.created_at;
        assert_eq!(a.age_order(&b), Ordering::Less);

        b.created_at = a.created_at - chrono::Duration::seconds(1);
        assert_eq!(a.age_order(&b), Ordering::Greater);
    }

    #[test]
    fn test_new_contact_blank_identifiers() {
        let c = NewContact::primary(Some("  "), Some("123"));
        assert_eq!(c.email, None);
        assert_eq!(c.phone_number.as_deref(), Some("123"));
        assert!(!c.is_empty());
        assert!(NewContact::primary(Some(""), None).is_empty());
    }

    #[test]
    fn test_precedence_serde() {
        let json = serde_json::to_string(&LinkPrecedence::Secondary).unwrap();
        assert_eq!(json, "\"secondary\"");
        let back: LinkPrecedence = serde_json::from_str("\"primary\"").unwrap();
        assert_eq!(back, LinkPrecedence::Primary);
    }
}
