//! Per-invocation callback secrets.
//!
//! A fresh secret is issued with every invocation and handed to the
//! destination together with the callback URL. Only its HMAC-SHA256 is kept
//! in the invocation repository; a callback is accepted when the MAC of the
//! presented secret verifies against it.

use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Opaque secret value. `Debug` never prints the content.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Generate a random 256-bit secret, hex encoded.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl core::fmt::Debug for Secret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// HMAC-SHA256 of secrets under a service-wide key.
#[derive(Clone)]
pub struct SecretHasher {
    key: Vec<u8>,
}

impl SecretHasher {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// Hash a raw secret into its stored form.
    pub fn encode(&self, secret: &Secret) -> Secret {
        match self.mac(secret.expose()) {
            Some(mac) => Secret(hex::encode(mac.finalize().into_bytes())),
            None => Secret(String::new()),
        }
    }

    /// Verify a presented raw secret against a stored hash in constant time.
    pub fn matches(&self, hash: &Secret, presented: &str) -> bool {
        if hash.is_empty() || presented.is_empty() {
            return false;
        }
        let Ok(expected) = hex::decode(hash.expose()) else {
            return false;
        };
        self.mac(presented)
            .is_some_and(|mac| mac.verify_slice(&expected).is_ok())
    }

    // HMAC accepts any key length. An empty stored hash never matches.
    fn mac(&self, raw: &str) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(raw.as_bytes());
        Some(mac)
    }
}

impl core::fmt::Debug for SecretHasher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SecretHasher").finish_non_exhaustive()
    }
}
