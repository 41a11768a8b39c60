//! Sudo credential handling.

mod cipher;
mod session;

pub use cipher::{CipherError, CredentialCipher};
pub use session::{
    ElevatedSpawn, MAX_RETRIES, PrivilegedSession, SessionGuard, SudoOutcome, VerifyOutcome,
    looks_like_auth_failure,
};
