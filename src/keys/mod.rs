pub mod soft;

pub use soft::SoftKeyProvider;

use crate::ctap2::authenticator_data::CosePublicKey;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key unavailable: {0}")]
    KeyUnavailable(String),
    #[error("user authentication required")]
    UserAuthenticationRequired,
    #[error("user authentication failed")]
    UserAuthenticationFailed,
    #[error("key storage: {0}")]
    Storage(String),
    #[error("crypto: {0}")]
    Crypto(String),
}

/// Custodian of credential private keys. Keys are addressed by an opaque
/// binding id and never leave the provider.
pub trait KeyProvider: Send + Sync {
    /// Create (or replace) the P-256 key bound to `binding_id`.
    fn generate_key(&self, binding_id: &str) -> Result<CosePublicKey, KeyError>;

    /// ES256 signature over `message`, DER encoded.
    fn sign(&self, binding_id: &str, message: &[u8]) -> Result<Vec<u8>, KeyError>;

    fn delete_key(&self, binding_id: &str) -> Result<(), KeyError>;
}
