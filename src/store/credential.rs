use serde::{Deserialize, Serialize};

use crate::ctap2::authenticator_data::CosePublicKey;
use crate::ctap2::types::UserEntity;

pub const RECORD_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub version:       u8,
    pub credential_id: Vec<u8>,     // 32 bytes random
    pub rp_id:         String,
    pub user:          UserEntity,
    pub public_key_x:  Vec<u8>,     // P-256 x, 32 bytes
    pub public_key_y:  Vec<u8>,     // P-256 y, 32 bytes
    pub binding_id:    String,      // key provider handle
    pub sign_count:    u32,
    pub created_at:    u64,         // Unix timestamp, milliseconds
}

impl CredentialRecord {
    pub fn public_key(&self) -> Option<CosePublicKey> {
        CosePublicKey::from_coordinates(&self.public_key_x, &self.public_key_y)
    }
}
