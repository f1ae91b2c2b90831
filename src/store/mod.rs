pub mod credential;
pub mod disk;
pub mod index;

pub use credential::CredentialRecord;
pub use index::{CredentialId, CredentialStore};

use crate::keys::KeyError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialize: {0}")]
    Serialization(String),
    #[error("Encrypt: {0}")]
    Encryption(String),
    #[error("Corrupt: {0}")]
    Corrupt(String),
    #[error("Unknown credential")]
    UnknownCredential,
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(KeyError),
    #[error("Signing failed: {0}")]
    SigningFailed(KeyError),
    #[error("Store lock poisoned")]
    Poisoned,
}
