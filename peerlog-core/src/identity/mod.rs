//! Identity records and the machinery that keeps them resolvable.
//!
//! Two identity types are cached: [`User`] and [`Peer`]. Both are immutable
//! once fetched; a refresh replaces the whole snapshot rather than mutating
//! individual entries.
//!
//! - [`directory`] fetches full snapshots from the upstream directory API.
//! - [`cache`] is the read-through, single-flight cache in front of it.

pub mod cache;
pub mod directory;

pub use cache::IdentityCache;
pub use directory::{DirectoryClient, DirectoryConfig, IdentitySource};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which directory collection an identity comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    User,
    Peer,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Peer => "peer",
        }
    }

    /// Path of the collection on the directory API, relative to the base URL.
    pub fn collection_path(&self) -> &'static str {
        match self {
            Self::User => "/api/users",
            Self::Peer => "/api/peers",
        }
    }
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record type the identity cache can hold.
pub trait Identity: DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: IdentityKind;

    /// The directory-assigned identifier used as the cache key.
    fn id(&self) -> &str;
}

/// A directory user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub last_login: String,
}

impl User {
    /// Human-readable name for audit records: the name, else the email.
    pub fn display_name(&self) -> Option<&str> {
        [self.name.as_str(), self.email.as_str()]
            .into_iter()
            .find(|s| !s.trim().is_empty())
    }
}

impl Identity for User {
    const KIND: IdentityKind = IdentityKind::User;

    fn id(&self) -> &str {
        &self.id
    }
}

/// A network peer (device) owned by a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Peer {
    pub id: String,
    pub hostname: String,
    #[serde(rename = "ip")]
    pub ip_address: String,
    #[serde(rename = "user_id")]
    pub owner_user_id: String,
}

impl Identity for Peer {
    const KIND: IdentityKind = IdentityKind::Peer;

    fn id(&self) -> &str {
        &self.id
    }
}
