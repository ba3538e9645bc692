//! Signed registration tokens
//!
//! A token is `base64url(claims JSON) . base64url(HMAC-SHA256 tag)`,
//! signed with a process-wide key that is read-only after startup. The
//! claims bind the plugin identity (`sub`), this gateway (`iss`), the
//! plugin's resolved location URI (`aud`), a validity window (`iat`/`exp`)
//! and, when it could be resolved at issue time, the caller's network
//! origin.
//!
//! Validation order is fixed: signature, then expiry, then audience, then
//! (strict only) origin. A token whose origin claim is absent acts as an
//! origin wildcard - issue-time resolution is allowed to degrade to
//! nothing. Which check failed is never revealed to remote callers; the
//! HTTP layer collapses every [`TokenError`] into one uniform
//! authentication failure.

use std::net::IpAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// Token validation failure
///
/// Kept internal to the gateway; remote callers see a single uniform
/// authentication failure regardless of variant.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    /// Token structure could not be parsed
    #[error("malformed token")]
    Malformed,
    /// Signature did not verify, or identity claims did not match
    #[error("bad signature")]
    BadSignature,
    /// Token is past its expiry
    #[error("token expired")]
    Expired,
    /// Audience does not match the plugin's current location
    #[error("audience mismatch")]
    AudienceMismatch,
    /// Caller's network origin does not match the bound origin
    #[error("origin mismatch")]
    OriginMismatch,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iss: String,
    aud: String,
    iat: u64,
    exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin: Option<String>,
}

/// Issues and validates registration tokens
///
/// `create` and `validate` are pure functions over their inputs and the
/// signing key; the service holds no mutable state.
pub struct TokenService {
    key: Vec<u8>,
    issuer: String,
    ttl: Duration,
}

impl TokenService {
    /// Create a service with the given signing key, issuer name, and
    /// token lifetime
    pub fn new(key: Vec<u8>, issuer: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key,
            issuer: issuer.into(),
            ttl,
        }
    }

    /// Mint a fresh token for a plugin
    ///
    /// Always issues a new token; refreshing never reuses. `remote` is
    /// the resolver-observed caller origin, or `None` when resolution
    /// degraded - an absent origin claim validates as a wildcard.
    pub fn create(
        &self,
        plugin_id: &str,
        remote: Option<IpAddr>,
        location: &Url,
    ) -> Result<String, TokenError> {
        let iat = unix_now();
        let claims = Claims {
            sub: plugin_id.to_string(),
            iss: self.issuer.clone(),
            aud: location.to_string(),
            iat,
            exp: iat + self.ttl.as_secs(),
            origin: remote.map(|ip| ip.to_string()),
        };
        self.encode(&claims)
    }

    /// Validate a token presented for `plugin_id` at `location`
    ///
    /// Signature and expiry are checked unconditionally; audience is
    /// checked against the plugin's current location; `strict` adds the
    /// origin check against the resolved caller address.
    pub fn validate(
        &self,
        plugin_id: &str,
        token: &str,
        location: &Url,
        remote: Option<IpAddr>,
        strict: bool,
    ) -> Result<(), TokenError> {
        let claims = self.decode(token)?;

        if claims.sub != plugin_id || claims.iss != self.issuer {
            return Err(TokenError::BadSignature);
        }
        if unix_now() > claims.exp {
            return Err(TokenError::Expired);
        }
        if claims.aud != location.as_str() {
            return Err(TokenError::AudienceMismatch);
        }
        if strict {
            if let Some(bound) = &claims.origin {
                let caller = remote.map(|ip| ip.to_string());
                if caller.as_deref() != Some(bound.as_str()) {
                    return Err(TokenError::OriginMismatch);
                }
            }
        }
        Ok(())
    }

    fn encode(&self, claims: &Claims) -> Result<String, TokenError> {
        let json = serde_json::to_vec(claims).map_err(|_| TokenError::Malformed)?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let tag = self.sign(payload.as_bytes())?;
        Ok(format!("{payload}.{}", URL_SAFE_NO_PAD.encode(tag)))
    }

    fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let (payload, tag) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag.as_bytes())
            .map_err(|_| TokenError::Malformed)?;

        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|_| TokenError::BadSignature)?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&tag).map_err(|_| TokenError::BadSignature)?;

        let json = URL_SAFE_NO_PAD
            .decode(payload.as_bytes())
            .map_err(|_| TokenError::Malformed)?;
        serde_json::from_slice(&json).map_err(|_| TokenError::Malformed)
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, TokenError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|_| TokenError::BadSignature)?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
