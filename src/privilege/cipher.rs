//! Reversible obfuscation of the cached sudo password.
//!
//! This is NOT encryption. The key is derived from the uid and pid, so any
//! process able to read our memory can undo it. It only keeps the plain
//! password out of casual memory dumps and debug output.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("stored credential is not valid base64")]
    Encoding,
    #[error("stored credential is not valid UTF-8")]
    Utf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialCipher {
    key: u8,
}

impl CredentialCipher {
    /// Key `(uid * 13 + pid * 7) mod 255` for the running process.
    pub fn for_current_process() -> Self {
        let uid = u64::from(nix::unistd::getuid().as_raw());
        let pid = u64::from(std::process::id());
        Self::from_ids(uid, pid)
    }

    pub fn from_ids(uid: u64, pid: u64) -> Self {
        Self::with_key(((uid * 13 + pid * 7) % 255) as u8)
    }

    pub fn with_key(key: u8) -> Self {
        Self { key }
    }

    fn key_byte(&self, index: usize) -> u8 {
        ((self.key as usize + index) % 255) as u8
    }

    fn apply(&self, bytes: &[u8]) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(
            bytes
                .iter()
                .enumerate()
                .map(|(i, b)| b ^ self.key_byte(i))
                .collect(),
        )
    }

    pub fn encrypt(&self, plain: &str) -> String {
        STANDARD.encode(self.apply(plain.as_bytes()).as_slice())
    }

    pub fn decrypt(&self, encoded: &str) -> Result<Zeroizing<String>, CipherError> {
        let raw = Zeroizing::new(STANDARD.decode(encoded).map_err(|_| CipherError::Encoding)?);
        let plain = self.apply(&raw);
        let text = std::str::from_utf8(&plain).map_err(|_| CipherError::Utf8)?;
        Ok(Zeroizing::new(text.to_string()))
    }
}
