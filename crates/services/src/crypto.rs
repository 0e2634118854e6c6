use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

const NONCE_SIZE: usize = 12; // 96 bits for GCM
const HINT_VISIBLE_CHARS: usize = 4;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid encryption key length: expected 32 bytes (256 bits), got {0}")]
    InvalidKeyLength(usize),
    #[error("Sealing failed: {0}")]
    SealFailed(String),
    #[error("Sealed key could not be opened")]
    KeyUnsealFailed,
    #[error("Invalid hashing secret: {0}")]
    InvalidSecret(String),
}

/// Provider API key sealed with the process-wide master key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedKey {
    /// base64(nonce || ciphertext || tag)
    pub ciphertext: String,
    /// Short plaintext hint safe to display, e.g. `***wxyz`
    pub hint: String,
}

/// AES-256-GCM sealing for provider credentials.
///
/// Each seal uses a fresh random nonce which is stored in front of the
/// ciphertext, so sealing the same key twice yields different ciphertexts.
#[derive(Clone)]
pub struct KeySealer {
    cipher: Aes256Gcm,
}

impl KeySealer {
    pub fn new(master_key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(master_key)),
        }
    }

    pub fn from_slice(master_key: &[u8]) -> Result<Self, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(master_key)
            .map_err(|_| CryptoError::InvalidKeyLength(master_key.len()))?;
        Ok(Self { cipher })
    }

    pub fn seal(&self, plaintext: &str) -> Result<SealedKey, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::SealFailed(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(SealedKey {
            ciphertext: STANDARD.encode(sealed),
            hint: key_hint(plaintext),
        })
    }

    /// Fails with [`CryptoError::KeyUnsealFailed`] on any tampering or
    /// malformed input.
    pub fn unseal(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let sealed = STANDARD
            .decode(ciphertext)
            .map_err(|_| CryptoError::KeyUnsealFailed)?;
        if sealed.len() <= NONCE_SIZE {
            return Err(CryptoError::KeyUnsealFailed);
        }

        let (nonce_bytes, body) = sealed.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|_| CryptoError::KeyUnsealFailed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::KeyUnsealFailed)
    }
}

impl std::fmt::Debug for KeySealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeySealer([REDACTED])")
    }
}

/// `***` followed by the last four characters; short keys are shown whole.
pub fn key_hint(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= HINT_VISIBLE_CHARS {
        return key.to_string();
    }
    let tail: String = chars[chars.len() - HINT_VISIBLE_CHARS..].iter().collect();
    format!("***{tail}")
}

/// Keyed one-way hash for API keys. Lookups always go through the hash.
#[derive(Clone)]
pub struct ApiKeyHasher {
    secret: Vec<u8>,
}

impl ApiKeyHasher {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, CryptoError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(CryptoError::InvalidSecret("secret is empty".to_string()));
        }
        Ok(Self {
            secret: secret.to_vec(),
        })
    }

    /// Hex-encoded HMAC-SHA256 of the plaintext key.
    pub fn hash(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .map_err(|e| CryptoError::InvalidSecret(e.to_string()))?;
        mac.update(plaintext.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl std::fmt::Debug for ApiKeyHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKeyHasher([REDACTED])")
    }
}
