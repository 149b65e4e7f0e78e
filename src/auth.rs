//! Credential authentication.
//!
//! Validates bearer-token shape, resolves the token against the identity
//! directory, checks enablement, and derives the caller's capability set.
//! Format failures and unknown credentials are indistinguishable to the
//! caller: same generic message, and both incur a randomized delay so the
//! rejected check cannot be recovered from response timing.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::audit;
use crate::identity::{AccessGrants, Capability, CapabilitySet, Identity, IdentityDirectory};
use crate::metrics;

/// Expected credential shape: this prefix followed by exactly 32 lowercase
/// hexadecimal characters.
pub const TOKEN_PREFIX: &str = "cpk_";
const TOKEN_HEX_LEN: usize = 32;

const FAILURE_DELAY_MIN_MS: u64 = 100;
const FAILURE_DELAY_MAX_MS: u64 = 300;

/// Why an authentication attempt failed. Internal only: every kind is
/// surfaced to the caller as the same generic `Unauthorized`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthFailureKind {
    NoCredential,
    InvalidFormat,
    InvalidCredential,
    AccountDisabled,
}

impl AuthFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoCredential => "no_credential",
            Self::InvalidFormat => "invalid_format",
            Self::InvalidCredential => "invalid_credential",
            Self::AccountDisabled => "account_disabled",
        }
    }
}

/// Successful authentication: the identity plus its derived capabilities.
/// Lives for one request only.
#[derive(Clone, Debug)]
pub struct AuthSuccess {
    pub identity: Identity,
    pub capabilities: CapabilitySet,
}

pub struct Authenticator {
    directory: Arc<dyn IdentityDirectory>,
}

impl Authenticator {
    pub fn new(directory: Arc<dyn IdentityDirectory>) -> Self {
        Self { directory }
    }

    /// Authenticate the raw `Authorization` header value. Stateless: the
    /// brute-force bookkeeping around failures belongs to the dispatcher.
    pub async fn authenticate(
        &self,
        header: Option<&str>,
        source: IpAddr,
    ) -> Result<AuthSuccess, AuthFailureKind> {
        let Some(token) = header.and_then(extract_bearer_token) else {
            return Err(reject(source, AuthFailureKind::NoCredential, None));
        };

        // Cheap pre-filter only; the directory lookup below is the
        // authoritative comparison.
        if !token_shape_ok(token) {
            failure_delay().await;
            return Err(reject(source, AuthFailureKind::InvalidFormat, Some(token)));
        }

        let Some(identity) = self.directory.find_by_credential(token).await else {
            failure_delay().await;
            return Err(reject(source, AuthFailureKind::InvalidCredential, Some(token)));
        };

        if !identity.enabled {
            return Err(reject(source, AuthFailureKind::AccountDisabled, Some(token)));
        }

        let capabilities = derive_capabilities(&identity.access);
        audit::auth_success(source, &identity.username);
        metrics::record_auth_attempt("success");
        Ok(AuthSuccess {
            identity,
            capabilities,
        })
    }
}

fn reject(source: IpAddr, kind: AuthFailureKind, token: Option<&str>) -> AuthFailureKind {
    audit::auth_failure(source, kind.as_str(), token);
    metrics::record_auth_attempt(kind.as_str());
    kind
}

fn extract_bearer_token(header: &str) -> Option<&str> {
    let rest = header.strip_prefix("Bearer ")?;
    let token = rest.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

fn token_shape_ok(token: &str) -> bool {
    let Some(body) = token.strip_prefix(TOKEN_PREFIX) else {
        return false;
    };
    body.len() == TOKEN_HEX_LEN
        && body
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Randomized 100-300 ms wait before reporting a credential rejection.
/// Runs on a spawned task so that dropping the request future (client
/// disconnect) cannot cut it short and reopen the timing side-channel.
async fn failure_delay() {
    let ms = rand::thread_rng().gen_range(FAILURE_DELAY_MIN_MS..=FAILURE_DELAY_MAX_MS);
    let handle = tokio::spawn(tokio::time::sleep(Duration::from_millis(ms)));
    let _ = handle.await;
}

/// Capability derivation, a pure function over the raw grants:
/// super-level `admin` wins outright; `read` and `write` accumulate from
/// their explicit grant or the broad `manage_content` grant; `delete`
/// requires its explicit grant; an empty result defaults to {read}.
pub fn derive_capabilities(grants: &AccessGrants) -> CapabilitySet {
    if grants.admin {
        return CapabilitySet::all();
    }

    let mut set = CapabilitySet::empty();
    if grants.read || grants.manage_content {
        set.insert(Capability::Read);
    }
    if grants.write || grants.manage_content {
        set.insert(Capability::Write);
    }
    if grants.delete {
        set.insert(Capability::Delete);
    }
    if set.is_empty() {
        set.insert(Capability::Read);
    }
    set
}
