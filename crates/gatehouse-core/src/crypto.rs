//! Cryptographic primitives for Gatehouse.
//!
//! Provides X25519 key agreement for bootstrap channels, ChaCha20-Poly1305
//! authenticated encryption, and the blake3-keyed token MAC. Pure functions
//! and value types; no state lives here.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{CoreError, Result};
use crate::types::UserId;

/// An X25519 public key (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KexPublicKey(pub [u8; 32]);

impl KexPublicKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidKeyMaterial)?;
        Ok(Self(arr))
    }

    /// Convert to x25519-dalek PublicKey.
    pub fn to_dalek(&self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl From<PublicKey> for KexPublicKey {
    fn from(pk: PublicKey) -> Self {
        Self(*pk.as_bytes())
    }
}

/// A server-side X25519 keypair for one key-exchange session.
///
/// The secret half never leaves this type; the session manager derives the
/// shared channel key immediately and drops the keypair.
pub struct KexKeypair {
    secret: StaticSecret,
    public: KexPublicKey,
}

impl KexKeypair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        let secret = StaticSecret::from(bytes);
        let public = KexPublicKey::from(PublicKey::from(&secret));
        Self { secret, public }
    }

    /// Create from seed bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = KexPublicKey::from(PublicKey::from(&secret));
        Self { secret, public }
    }

    /// Get the public key.
    pub fn public_key(&self) -> KexPublicKey {
        self.public
    }

    /// Perform key agreement with the peer's public key.
    pub fn diffie_hellman(&self, peer_public: &KexPublicKey) -> SharedKey {
        let shared = self.secret.diffie_hellman(&peer_public.to_dalek());
        SharedKey(*shared.as_bytes())
    }
}

impl fmt::Debug for KexKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KexKeypair({})", &self.public.to_hex()[..16])
    }
}

/// A shared secret derived from X25519 key agreement.
#[derive(Clone)]
pub struct SharedKey([u8; 32]);

impl SharedKey {
    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive the channel encryption key from this shared secret.
    ///
    /// Domain-separated so the raw agreement output is never used directly.
    pub fn derive_channel_key(&self, context: &[u8]) -> ChannelKey {
        use blake3::Hasher;
        let mut hasher = Hasher::new_derive_key("gatehouse-v1-channel");
        hasher.update(&self.0);
        hasher.update(context);
        ChannelKey(*hasher.finalize().as_bytes())
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedKey(..)")
    }
}

/// A 256-bit symmetric key for the encrypted bootstrap channel.
#[derive(Clone)]
pub struct ChannelKey([u8; 32]);

impl ChannelKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encrypt data with this key.
    pub fn encrypt(&self, plaintext: &[u8], iv: &Iv) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| CoreError::Encryption(e.to_string()))?;

        let nonce = Nonce::from_slice(&iv.0);
        cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CoreError::Encryption(e.to_string()))
    }

    /// Decrypt data with this key.
    pub fn decrypt(&self, ciphertext: &[u8], iv: &Iv) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| CoreError::Decryption(e.to_string()))?;

        let nonce = Nonce::from_slice(&iv.0);
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CoreError::Decryption(e.to_string()))
    }
}

impl fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelKey(..)")
    }
}

/// A 96-bit initialization vector for ChaCha20-Poly1305.
///
/// The all-zero value is a degenerate nonce and must never be stored in a
/// key-exchange session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iv(pub [u8; 12]);

impl Iv {
    /// The zero IV (invalid for sessions, used as a sentinel).
    pub const ZERO: Self = Self([0u8; 12]);

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Whether every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Generate a random IV, retrying until it is non-zero.
    pub fn generate_nonzero() -> Self {
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; 12];
        loop {
            rng.fill_bytes(&mut bytes);
            let iv = Self(bytes);
            if !iv.is_zero() {
                return iv;
            }
        }
    }
}

/// The process-wide secret that token MACs are keyed with.
#[derive(Clone)]
pub struct TokenSecret([u8; 32]);

impl TokenSecret {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidKeyMaterial)?;
        Ok(Self(arr))
    }

    /// Generate a random secret.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenSecret(..)")
    }
}

/// A computed bearer token value (32 bytes, hex on the wire).
#[derive(Clone, Copy, Eq, Serialize, Deserialize)]
pub struct TokenValue(pub [u8; 32]);

impl TokenValue {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Convert to hex string (the wire form presented by clients).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidKeyMaterial)?;
        Ok(Self(arr))
    }
}

impl PartialEq for TokenValue {
    fn eq(&self, other: &Self) -> bool {
        // blake3::Hash equality is constant-time; route the comparison
        // through it so token checks do not leak via timing.
        blake3::Hash::from_bytes(self.0) == blake3::Hash::from_bytes(other.0)
    }
}

impl std::hash::Hash for TokenValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Debug for TokenValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenValue({}...)", &self.to_hex()[..8])
    }
}

/// Compute the expected token value for a user from the stored salt and
/// validity window. Equality with the presented token is the sole pass
/// condition for basic auth.
pub fn token_mac(
    secret: &TokenSecret,
    user: UserId,
    salt: &[u8],
    valid_from: i64,
    expires_at: i64,
) -> TokenValue {
    use blake3::Hasher;
    let mut hasher = Hasher::new_derive_key("gatehouse-v1-token");
    hasher.update(&secret.0);
    hasher.update(&user.0.to_le_bytes());
    hasher.update(salt);
    hasher.update(&valid_from.to_le_bytes());
    hasher.update(&expires_at.to_le_bytes());
    TokenValue(*hasher.finalize().as_bytes())
}

/// Generate a random 16-byte token salt.
pub fn generate_salt() -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    bytes.to_vec()
}
