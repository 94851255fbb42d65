//! Bearer token check for privileged routes.
//!
//! - Token configured: requires `Authorization: Bearer <token>`
//! - Token not configured: only loopback peers are accepted

use std::net::SocketAddr;

use axum::http::{HeaderMap, header};
use sha2::{Digest, Sha256};

/// Check the caller against an optional admin token. Digests are compared,
/// never the raw strings.
pub fn is_authorized(token: &Option<String>, addr: &SocketAddr, headers: &HeaderMap) -> bool {
    match token {
        Some(expected) => headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|provided| {
                Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes())
            }),
        None => addr.ip().is_loopback(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
        headers
    }

    #[test]
    fn token_must_match() {
        let remote: SocketAddr = "10.0.0.5:4000".parse().unwrap();
        let token = Some("s3cret".to_string());
        assert!(is_authorized(&token, &remote, &bearer("s3cret")));
        assert!(!is_authorized(&token, &remote, &bearer("s3cre")));
        assert!(!is_authorized(&token, &remote, &HeaderMap::new()));
    }

    #[test]
    fn without_token_only_loopback() {
        let local: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let remote: SocketAddr = "10.0.0.5:4000".parse().unwrap();
        assert!(is_authorized(&None, &local, &HeaderMap::new()));
        assert!(!is_authorized(&None, &remote, &HeaderMap::new()));
    }
}
