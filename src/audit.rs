//! Security audit events.
//!
//! Every authentication attempt and every throttling decision emits a
//! structured `tracing` event on the `audit` target. Emission can never
//! fail and never aborts request processing. Failed attempts log a
//! truncated token prefix only, never the full credential.

use std::net::IpAddr;

use tracing::{info, warn};

/// How many leading characters of a presented token may appear in logs.
const TOKEN_PREFIX_LEN: usize = 8;

pub fn token_prefix(token: &str) -> String {
    token.chars().take(TOKEN_PREFIX_LEN).collect()
}

pub fn auth_success(source: IpAddr, username: &str) {
    info!(
        target: "audit",
        event = "auth_success",
        source = %source,
        username,
        "authentication succeeded"
    );
}

pub fn auth_failure(source: IpAddr, kind: &'static str, token: Option<&str>) {
    let prefix = token.map(token_prefix);
    warn!(
        target: "audit",
        event = "auth_failure",
        source = %source,
        kind,
        token_prefix = prefix.as_deref().unwrap_or(""),
        "authentication failed"
    );
}

pub fn rate_limited(source: IpAddr, identifier: &str) {
    warn!(
        target: "audit",
        event = "rate_limited",
        source = %source,
        identifier,
        "request rejected by rate window"
    );
}

pub fn lockout(source: IpAddr) {
    warn!(
        target: "audit",
        event = "brute_force_lockout",
        source = %source,
        "source locked out after repeated failed authentication"
    );
}

#[cfg(test)]
mod tests {
    use super::token_prefix;

    #[test]
    fn token_prefix_truncates_long_tokens() {
        let token = "cpk_0123456789abcdef0123456789abcdef";
        assert_eq!(token_prefix(token), "cpk_0123");
    }

    #[test]
    fn token_prefix_keeps_short_tokens_whole() {
        assert_eq!(token_prefix("abc"), "abc");
    }
}
