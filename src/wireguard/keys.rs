//! WireGuard key material
//!
//! x25519 keys with base64 encoding, redacted formatting and 0600 file
//! storage for private keys.

use crate::error::{ProvisionError, Result};
use crate::system::KeyGenerator;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::fmt;
use std::fs;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

fn decode_key(s: &str, what: &str) -> Result<[u8; 32]> {
    let decoded = BASE64
        .decode(s.trim())
        .map_err(|e| ProvisionError::Validation(format!("Invalid base64 {}: {}", what, e)))?;

    <[u8; 32]>::try_from(decoded.as_slice()).map_err(|_| {
        ProvisionError::Validation(format!(
            "Invalid {} length: expected 32 bytes, got {}",
            what,
            decoded.len()
        ))
    })
}

/// WireGuard private key (32 bytes, x25519)
#[derive(Clone)]
pub struct PrivateKey {
    secret: Zeroizing<[u8; 32]>,
}

impl PrivateKey {
    /// Generate a new random private key
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        Self {
            secret: Zeroizing::new(secret.to_bytes()),
        }
    }

    /// Parse a private key from its base64 form
    pub fn from_base64(s: &str) -> Result<Self> {
        Ok(Self {
            secret: Zeroizing::new(decode_key(s, "private key")?),
        })
    }

    /// Load a private key from a file, refusing group/world-readable files
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mode = fs::metadata(path)?.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(ProvisionError::Validation(format!(
                "Private key file {:?} has insecure permissions: {:o} (should be 0600)",
                path,
                mode & 0o777
            )));
        }

        let content = Zeroizing::new(fs::read_to_string(path)?);
        Self::from_base64(content.trim())
    }

    /// Write the key to `path`, created with mode 0600
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let encoded = Zeroizing::new(format!("{}\n", self.to_base64()));

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        // An existing file keeps its old mode through open(); force it.
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
        file.write_all(encoded.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Base64 form
    pub fn to_base64(&self) -> String {
        BASE64.encode(*self.secret)
    }

    /// Corresponding public key
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(*self.secret);
        PublicKey {
            key: X25519PublicKey::from(&secret).to_bytes(),
        }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

impl fmt::Display for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// WireGuard public key (32 bytes, x25519)
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey {
    key: [u8; 32],
}

impl PublicKey {
    /// Parse a public key from its base64 form
    pub fn from_base64(s: &str) -> Result<Self> {
        Ok(Self {
            key: decode_key(s, "public key")?,
        })
    }

    /// Base64 form
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.key)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_base64())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

/// Private key with its derived public key
#[derive(Clone)]
pub struct KeyPair {
    /// Private key
    pub private: PrivateKey,
    /// Public key (derived from private)
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_private(PrivateKey::generate())
    }

    /// Build a key pair from a private key
    pub fn from_private(private: PrivateKey) -> Self {
        let public = private.public_key();
        Self { private, public }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private", &"[REDACTED]")
            .field("public", &self.public)
            .finish()
    }
}

/// In-process x25519 key generation
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeKeyGenerator;

#[async_trait]
impl KeyGenerator for NativeKeyGenerator {
    async fn generate(&self) -> Result<KeyPair> {
        Ok(KeyPair::generate())
    }
}
