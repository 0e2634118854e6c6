//! Opaque public identifiers.
//!
//! Every entity exposes `<prefix>_<suffix>` where the suffix is drawn from the
//! OS CSPRNG and encoded base64url without padding. Internal numeric IDs never
//! leave the process.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand_core::{OsRng, RngCore};

pub const PREFIX_CONV: &str = "conv";
pub const PREFIX_MSG: &str = "msg";
pub const PREFIX_ORG: &str = "org";
pub const PREFIX_PROJ: &str = "proj";
pub const PREFIX_USR: &str = "usr";
pub const PREFIX_KEY: &str = "key";
pub const PREFIX_PRV: &str = "prv";
pub const PREFIX_RESP: &str = "resp";
pub const PREFIX_CHATCMPL: &str = "chatcmpl";

/// Suffix length shared by every entity kind.
pub const ID_SUFFIX_LEN: usize = 16;

/// Plaintext API keys are `sk-` followed by a longer secure suffix.
pub const API_KEY_PREFIX: &str = "sk-";
pub const API_KEY_SUFFIX_LEN: usize = 48;

#[derive(Debug, thiserror::Error)]
#[error("secure random source failed: {0}")]
pub struct IdGenerationError(String);

fn secure_suffix(len: usize) -> Result<String, IdGenerationError> {
    let mut bytes = vec![0u8; len * 3 / 4 + 2];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| IdGenerationError(e.to_string()))?;
    let mut encoded = URL_SAFE_NO_PAD.encode(&bytes);
    encoded.truncate(len);
    Ok(encoded)
}

/// Produces `prefix_<len random base64url chars>`.
pub fn generate_secure_id(prefix: &str, len: usize) -> Result<String, IdGenerationError> {
    Ok(format!("{prefix}_{}", secure_suffix(len)?))
}

/// Produces an ID with the standard suffix length.
pub fn generate_public_id(prefix: &str) -> Result<String, IdGenerationError> {
    generate_secure_id(prefix, ID_SUFFIX_LEN)
}

pub fn generate_api_key() -> Result<String, IdGenerationError> {
    Ok(format!("{API_KEY_PREFIX}{}", secure_suffix(API_KEY_SUFFIX_LEN)?))
}

/// Accepts only `<prefix>_` followed by one or more base64url characters.
pub fn validate_id_format(id: &str, prefix: &str) -> bool {
    id.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|suffix| {
            !suffix.is_empty()
                && suffix
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        })
}
