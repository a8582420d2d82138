//! Request signing for the Kalshi feed
//!
//! The feed authenticates each connection attempt with three headers: the
//! access key id, a base64 HMAC-SHA256 signature over the millisecond
//! timestamp, and the timestamp itself. Signing is pure; the only failure
//! mode is missing credentials, which is rejected at construction.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use relay_core::{RelayError, RelayResult};

type HmacSha256 = Hmac<Sha256>;

/// Environment variable holding the Kalshi access key id
pub const API_KEY_ID_ENV: &str = "KALSHI_API_KEY_ID";
/// Environment variable holding the Kalshi signing secret
pub const PRIVATE_KEY_ENV: &str = "KALSHI_PRIVATE_KEY";

/// Header names sent once per connection attempt
pub const ACCESS_KEY_HEADER: &str = "KALSHI-ACCESS-KEY";
pub const ACCESS_SIGNATURE_HEADER: &str = "KALSHI-ACCESS-SIGNATURE";
pub const ACCESS_TIMESTAMP_HEADER: &str = "KALSHI-ACCESS-TIMESTAMP";

/// Credentials for the upstream feed
#[derive(Clone)]
pub struct FeedCredentials {
    pub key_id: String,
    pub secret: String,
}

impl FeedCredentials {
    /// Load credentials from the environment
    pub fn from_env() -> RelayResult<Self> {
        let key_id = std::env::var(API_KEY_ID_ENV)
            .map_err(|_| RelayError::config(format!("{} must be set", API_KEY_ID_ENV)))?;
        let secret = std::env::var(PRIVATE_KEY_ENV)
            .map_err(|_| RelayError::config(format!("{} must be set", PRIVATE_KEY_ENV)))?;
        Ok(Self { key_id, secret })
    }
}

impl std::fmt::Debug for FeedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedCredentials")
            .field("key_id", &self.key_id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Authentication headers for one connection attempt
#[derive(Debug, Clone)]
pub struct AuthHeaders {
    pub key_id: String,
    pub signature: String,
    pub timestamp: String,
}

/// Signs connection timestamps with the feed secret
#[derive(Clone)]
pub struct Signer {
    key_id: String,
    secret: String,
}

impl Signer {
    /// Create a signer, rejecting empty credentials up front
    pub fn new(credentials: FeedCredentials) -> RelayResult<Self> {
        if credentials.key_id.is_empty() || credentials.secret.is_empty() {
            return Err(RelayError::config(
                "Kalshi access key id and signing secret must both be non-empty",
            ));
        }
        Ok(Self {
            key_id: credentials.key_id,
            secret: credentials.secret,
        })
    }

    /// Sign a millisecond timestamp string
    pub fn sign(&self, timestamp: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(timestamp.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    /// Produce the header triple for a fresh connection attempt
    pub fn auth_headers(&self) -> AuthHeaders {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
            .to_string();
        let signature = self.sign(&timestamp);
        AuthHeaders {
            key_id: self.key_id.clone(),
            signature,
            timestamp,
        }
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("key_id", &self.key_id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
