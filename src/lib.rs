//! # Linkage - Contact Identity Reconciliation
//!
//! Linkage links partial contact records (an email, a phone number, or
//! both) that belong to the same person into a single canonical identity.
//! Each identity is a *network*: one primary record, the oldest, plus any
//! number of secondary records linked directly to it.
//!
//! ## Core Concepts
//!
//! - **Contact**: A stored record carrying at least one identifier
//! - **Network**: One primary and its secondaries
//! - **Resolution**: Folding a submission into its network, merging networks
//!   the submission bridges and recording new information
//! - **ContactIdentity**: The consolidated view returned to callers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use linkage::{IdentityResolver, InMemoryContactStore};
//!
//! let resolver = IdentityResolver::new(Arc::new(InMemoryContactStore::new()));
//! let identity = resolver.resolve(Some("doc@hillvalley.edu"), Some("123456"))?.identity();
//! assert!(identity.secondary_contact_ids.is_empty());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod contact;
pub mod error;
pub mod presenter;
pub mod resolver;
pub mod seed;
pub mod storage;
pub mod time;

pub use config::ResolverConfig;
pub use contact::{Contact, ContactId, LinkPrecedence, NewContact};
pub use error::{IdentityError, IdentityResult, ValidationError};
pub use presenter::{ContactIdentity, IdentifyResponse};
pub use resolver::{IdentifyRequest, IdentityResolver, Resolution};
pub use seed::seed_demo_contacts;
pub use storage::{
    ContactMutation, ContactStore, ContactTransaction, InMemoryContactStore, StorageError,
};
pub use time::{Clock, ManualClock, SystemClock};

#[cfg(feature = "persistent")]
pub use storage::{open_database, PersistentConfig, PersistentContactStore};
