//! 7zAES key derivation

use nzbstream_index::DecryptionParams;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{FormatError, FormatResult};

/// Cycle power meaning "no hashing, salt and password are the key"
const RAW_KEY_POWER: u8 = 0x3F;

/// Parsed coder properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AesProperties {
    /// log2 of the SHA-256 iteration count
    pub cycles_power: u8,
    /// Salt bytes
    pub salt: Vec<u8>,
    /// IV, zero padded to 16 bytes
    pub iv: [u8; 16],
}

impl AesProperties {
    /// Decode the property bytes of a 7zAES coder
    pub fn parse(props: &[u8]) -> FormatResult<Self> {
        let first = *props
            .first()
            .ok_or_else(|| FormatError::Decode("empty 7zAES properties".into()))?;
        let cycles_power = first & 0x3F;
        if first & 0xC0 == 0 {
            return Ok(Self {
                cycles_power,
                salt: Vec::new(),
                iv: [0; 16],
            });
        }

        let second = *props
            .get(1)
            .ok_or_else(|| FormatError::Decode("truncated 7zAES properties".into()))?;
        let salt_len = usize::from((first >> 7) & 1) + usize::from(second >> 4);
        let iv_len = usize::from((first >> 6) & 1) + usize::from(second & 0x0F);
        let salt = props
            .get(2..2 + salt_len)
            .ok_or_else(|| FormatError::Decode("7zAES salt runs past properties".into()))?;
        let iv_bytes = props
            .get(2 + salt_len..2 + salt_len + iv_len)
            .ok_or_else(|| FormatError::Decode("7zAES IV runs past properties".into()))?;

        let mut iv = [0u8; 16];
        iv[..iv_len].copy_from_slice(iv_bytes);
        Ok(Self {
            cycles_power,
            salt: salt.to_vec(),
            iv,
        })
    }

    /// Derive the AES-256 key for `password`
    pub fn derive_key(&self, password: &str) -> [u8; 32] {
        let password: Vec<u8> = password.encode_utf16().flat_map(u16::to_le_bytes).collect();
        let mut key = [0u8; 32];

        if self.cycles_power == RAW_KEY_POWER {
            let raw = self.salt.iter().chain(&password).take(32);
            for (slot, byte) in key.iter_mut().zip(raw) {
                *slot = *byte;
            }
            return key;
        }

        let mut hasher = Sha256::new();
        for round in 0..(1u64 << self.cycles_power) {
            hasher.update(&self.salt);
            hasher.update(&password);
            hasher.update(round.to_le_bytes());
        }
        key.copy_from_slice(&hasher.finalize());
        key
    }
}

/// Key material for an encrypted entry
///
/// Fails with [`FormatError::PasswordProtected`] when no password is known.
pub fn derive_decryption_params(
    entry: &str,
    props: &[u8],
    password: Option<&str>,
    decoded_size: u64,
) -> FormatResult<DecryptionParams> {
    let password = password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| FormatError::PasswordProtected(entry.to_string()))?;
    let props = AesProperties::parse(props)?;
    debug!(
        "Deriving 7zAES key for '{}' with 2^{} rounds",
        entry, props.cycles_power
    );
    Ok(DecryptionParams::new(
        props.derive_key(password),
        props.iv,
        decoded_size,
    ))
}
