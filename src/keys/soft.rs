use p256::ecdsa::{Signature, SigningKey, signature::Signer};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use super::{KeyError, KeyProvider};
use crate::ctap2::authenticator_data::CosePublicKey;
use crate::store::disk;

/// Software key custodian: one AES-GCM sealed P-256 scalar per binding id,
/// stored as `dir/{sha256(binding_id)}.key`.
pub struct SoftKeyProvider {
    aes_key: [u8; 32],
    dir:     PathBuf,
}

impl SoftKeyProvider {
    pub fn open(aes_key: [u8; 32], dir: PathBuf) -> Result<Self, KeyError> {
        std::fs::create_dir_all(&dir).map_err(|e| KeyError::Storage(e.to_string()))?;
        Ok(Self { aes_key, dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, binding_id: &str) -> PathBuf {
        let digest = Sha256::digest(binding_id.as_bytes());
        self.dir.join(format!("{}.key", disk::hex(&digest)))
    }

    fn load(&self, binding_id: &str) -> Result<SigningKey, KeyError> {
        let sealed = match std::fs::read(self.key_path(binding_id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KeyError::KeyUnavailable(binding_id.to_string()));
            }
            Err(e) => return Err(KeyError::Storage(e.to_string())),
        };
        let scalar = disk::open(&self.aes_key, &sealed).map_err(|e| KeyError::Storage(e.to_string()))?;
        SigningKey::from_slice(&scalar).map_err(|e| KeyError::Crypto(e.to_string()))
    }
}

impl KeyProvider for SoftKeyProvider {
    fn generate_key(&self, binding_id: &str) -> Result<CosePublicKey, KeyError> {
        let signing_key = SigningKey::random(&mut OsRng);
        let sealed = disk::seal(&self.aes_key, signing_key.to_bytes().as_slice())
            .map_err(|e| KeyError::Crypto(e.to_string()))?;
        disk::write_atomic(&self.key_path(binding_id), &sealed)
            .map_err(|e| KeyError::Storage(e.to_string()))?;

        let point = signing_key.verifying_key().to_encoded_point(false);
        let (Some(x), Some(y)) = (point.x(), point.y()) else {
            return Err(KeyError::Crypto("public key is the identity point".into()));
        };
        CosePublicKey::from_coordinates(x, y)
            .ok_or_else(|| KeyError::Crypto("public key coordinate too long".into()))
    }

    fn sign(&self, binding_id: &str, message: &[u8]) -> Result<Vec<u8>, KeyError> {
        let signing_key = self.load(binding_id)?;
        let signature: Signature = signing_key.sign(message);
        Ok(signature.to_der().as_bytes().to_vec())
    }

    fn delete_key(&self, binding_id: &str) -> Result<(), KeyError> {
        match std::fs::remove_file(self.key_path(binding_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KeyError::Storage(e.to_string())),
        }
    }
}
