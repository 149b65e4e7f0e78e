//! Identity model and directory access.
//!
//! The identity directory is an external collaborator: the gateway only
//! ever reads it, one lookup per request. The in-memory directory here
//! backs the binary (loaded from a JSON file) and the tests.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::errors::GatewayError;

/// The unit of permission granted to an identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Read,
    Write,
    Delete,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Read => write!(f, "read"),
            Capability::Write => write!(f, "write"),
            Capability::Delete => write!(f, "delete"),
        }
    }
}

/// A set over {read, write, delete}. Non-empty for any successful
/// authentication: derivation defaults an ungranted identity to {read}.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        let mut set = Self::empty();
        set.insert(Capability::Read);
        set.insert(Capability::Write);
        set.insert(Capability::Delete);
        set
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Raw grants as reported by the directory. `admin` is the super-level
/// grant; `manage_content` is the broad content-management grant.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessGrants {
    pub admin: bool,
    pub manage_content: bool,
    pub read: bool,
    pub write: bool,
    pub delete: bool,
}

/// An authenticated caller. Read per request, never cached or mutated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    pub enabled: bool,
    #[serde(default)]
    pub access: AccessGrants,
}

/// External identity directory seam. The lookup is the authoritative
/// credential comparison and must be constant-time internally.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn find_by_credential(&self, token: &str) -> Option<Identity>;
}

/// Directory entry as stored in the identities JSON file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub token: String,
    #[serde(flatten)]
    pub identity: Identity,
}

#[derive(Default)]
pub struct MemoryDirectory {
    entries: Vec<DirectoryEntry>,
}

impl MemoryDirectory {
    pub fn new(entries: Vec<DirectoryEntry>) -> Self {
        Self { entries }
    }

    /// Load entries from a JSON array file.
    pub fn load_from_file(path: &Path) -> Result<Self, GatewayError> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            GatewayError::internal(anyhow::anyhow!(
                "failed to read identities file {}: {err}",
                path.display()
            ))
        })?;
        let entries: Vec<DirectoryEntry> = serde_json::from_str(&content).map_err(|err| {
            GatewayError::internal(anyhow::anyhow!(
                "invalid identities file {}: {err}",
                path.display()
            ))
        })?;
        Ok(Self::new(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Constant-time token equality. Length is not secret (the token shape is
/// public), the content is.
fn token_matches(candidate: &str, stored: &str) -> bool {
    let (a, b) = (candidate.as_bytes(), stored.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[async_trait]
impl IdentityDirectory for MemoryDirectory {
    async fn find_by_credential(&self, token: &str) -> Option<Identity> {
        // Scan every entry rather than returning on first match, so lookup
        // cost does not depend on where the match sits.
        let mut found: Option<Identity> = None;
        for entry in &self.entries {
            if token_matches(token, &entry.token) {
                found = Some(entry.identity.clone());
            }
        }
        found
    }
}
