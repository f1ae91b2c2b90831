use rand::Rng;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::{StoreError, credential::{CredentialRecord, RECORD_VERSION}, disk};
use crate::ctap2::authenticator_data::CosePublicKey;
use crate::ctap2::types::UserEntity;
use crate::keys::KeyProvider;
use crate::up::UserPresenceProof;

pub type CredentialId = [u8; 32];

pub struct CredentialStore {
    aes_key:    [u8; 32],
    creds_dir:  PathBuf,
    provider:   Arc<dyn KeyProvider>,
    by_id:      HashMap<CredentialId, CredentialRecord>,
    by_rp:      HashMap<String, Vec<CredentialId>>,
    last_stamp: u64,
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn binding_id(rp_id: &str, id: &CredentialId) -> String {
    format!("{rp_id}/{}", disk::hex(id))
}

impl CredentialStore {
    /// Load all credentials from disk into memory.
    pub fn load(
        aes_key: [u8; 32],
        creds_dir: PathBuf,
        provider: Arc<dyn KeyProvider>,
    ) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&creds_dir)?;
        let records = disk::load_all(&aes_key, &creds_dir)?;
        let mut store = Self {
            aes_key,
            creds_dir,
            provider,
            by_id: HashMap::new(),
            by_rp: HashMap::new(),
            last_stamp: 0,
        };
        for record in records {
            let Ok(id) = CredentialId::try_from(record.credential_id.as_slice()) else {
                tracing::warn!(rp_id = %record.rp_id, "Skipping credential with malformed id");
                continue;
            };
            store.last_stamp = store.last_stamp.max(record.created_at);
            store.index(id, record);
        }
        Ok(store)
    }

    fn index(&mut self, id: CredentialId, record: CredentialRecord) {
        let ids = self.by_rp.entry(record.rp_id.clone()).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
        self.by_id.insert(id, record);
    }

    fn unindex(&mut self, id: &CredentialId) -> Option<CredentialRecord> {
        let record = self.by_id.remove(id)?;
        if let Some(ids) = self.by_rp.get_mut(&record.rp_id) {
            ids.retain(|i| i != id);
            if ids.is_empty() {
                self.by_rp.remove(&record.rp_id);
            }
        }
        Some(record)
    }

    /// Creation stamps are strictly increasing so "newest first" is a total order.
    fn next_stamp(&mut self) -> u64 {
        self.last_stamp = now_millis().max(self.last_stamp + 1);
        self.last_stamp
    }

    fn get(&self, rp_id: &str, credential_id: &[u8]) -> Option<&CredentialRecord> {
        let id = CredentialId::try_from(credential_id).ok()?;
        self.by_id.get(&id).filter(|r| r.rp_id == rp_id)
    }

    /// Credentials registered for `rp_id`, most recent first.
    pub fn list_credentials(&self, rp_id: &str) -> Vec<(CredentialId, UserEntity)> {
        let Some(ids) = self.by_rp.get(rp_id) else {
            return Vec::new();
        };
        let mut records: Vec<(&CredentialId, &CredentialRecord)> = ids
            .iter()
            .filter_map(|id| self.by_id.get(id).map(|r| (id, r)))
            .collect();
        records.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at));
        records.into_iter().map(|(id, r)| (*id, r.user.clone())).collect()
    }

    pub fn exists(&self, rp_id: &str, credential_id: &[u8]) -> bool {
        self.get(rp_id, credential_id).is_some()
    }

    /// Register a credential under a freshly generated id, replacing any
    /// earlier credential for the same `(rp_id, user.id)`.
    pub fn create_credential(
        &mut self,
        rp_id: &str,
        user: UserEntity,
        proof: &UserPresenceProof,
    ) -> Result<(CredentialId, CosePublicKey), StoreError> {
        let id: CredentialId = rand::thread_rng().r#gen();
        let (public_key, replaced) = self.create_credential_with_id(rp_id, id, user, proof)?;
        self.supersede(&id, &replaced)?;
        Ok((id, public_key))
    }

    /// Persist and index a credential under `id`.
    ///
    /// Returns the public key and the ids of older credentials for the same
    /// `(rp_id, user.id)`. Those stay stored until [`Self::supersede`] runs.
    pub fn create_credential_with_id(
        &mut self,
        rp_id: &str,
        id: CredentialId,
        user: UserEntity,
        _proof: &UserPresenceProof,
    ) -> Result<(CosePublicKey, Vec<CredentialId>), StoreError> {
        let binding = binding_id(rp_id, &id);
        let public_key = self
            .provider
            .generate_key(&binding)
            .map_err(StoreError::KeyGenerationFailed)?;

        let record = CredentialRecord {
            version: RECORD_VERSION,
            credential_id: id.to_vec(),
            rp_id: rp_id.to_string(),
            user,
            public_key_x: public_key.x.to_vec(),
            public_key_y: public_key.y.to_vec(),
            binding_id: binding.clone(),
            sign_count: 0,
            created_at: self.next_stamp(),
        };
        if let Err(e) = disk::write_credential(&self.aes_key, &self.creds_dir, &record) {
            if let Err(cleanup) = self.provider.delete_key(&binding) {
                tracing::warn!(binding = %binding, error = %cleanup, "Failed to discard orphaned key");
            }
            return Err(e);
        }

        let replaced: Vec<CredentialId> = self
            .by_rp
            .get(rp_id)
            .into_iter()
            .flatten()
            .filter(|other| **other != id)
            .filter(|other| self.by_id.get(*other).is_some_and(|r| r.user.id == record.user.id))
            .copied()
            .collect();

        tracing::info!(rp_id, cred_id = disk::hex(&id), "Credential stored");
        self.index(id, record);
        Ok((public_key, replaced))
    }

    /// Remove the credentials in `replaced` now that `id` stands in for them.
    /// If one of them cannot be removed, `id` is rolled back instead.
    pub fn supersede(&mut self, id: &CredentialId, replaced: &[CredentialId]) -> Result<(), StoreError> {
        for old in replaced {
            tracing::info!(cred_id = disk::hex(old), "Replacing previous credential for user");
            if let Err(e) = self.remove(old) {
                if let Err(rollback) = self.remove(id) {
                    tracing::warn!(cred_id = disk::hex(id), error = %rollback, "Failed to roll back new credential");
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Sign `message` with the credential's key and advance its counter by one.
    pub fn sign(
        &mut self,
        rp_id: &str,
        credential_id: &[u8],
        message: &[u8],
        _proof: &UserPresenceProof,
    ) -> Result<Vec<u8>, StoreError> {
        let record = self.get(rp_id, credential_id).ok_or(StoreError::UnknownCredential)?;
        let next = record
            .sign_count
            .checked_add(1)
            .ok_or_else(|| StoreError::Corrupt("counter exhausted".into()))?;
        let signature = self
            .provider
            .sign(&record.binding_id, message)
            .map_err(StoreError::SigningFailed)?;

        let mut updated = record.clone();
        updated.sign_count = next;
        disk::write_credential(&self.aes_key, &self.creds_dir, &updated)?;
        tracing::debug!(rp_id, count = updated.sign_count, "Sign counter advanced");

        let id = CredentialId::try_from(credential_id).map_err(|_| StoreError::UnknownCredential)?;
        self.by_id.insert(id, updated);
        Ok(signature)
    }

    /// Build authenticator data from the current counter, sign
    /// `authData || clientDataHash` and advance the counter.
    /// Returns `(authData, signature)`.
    pub fn sign_with<F>(
        &mut self,
        rp_id: &str,
        credential_id: &[u8],
        client_data_hash: &[u8],
        build: F,
        proof: &UserPresenceProof,
    ) -> Result<(Vec<u8>, Vec<u8>), StoreError>
    where
        F: FnOnce(u32) -> Vec<u8>,
    {
        let count = self.sign_count(rp_id, credential_id)?;
        let auth_data = build(count);
        let mut message = Vec::with_capacity(auth_data.len() + client_data_hash.len());
        message.extend_from_slice(&auth_data);
        message.extend_from_slice(client_data_hash);
        let signature = self.sign(rp_id, credential_id, &message, proof)?;
        Ok((auth_data, signature))
    }

    pub fn sign_count(&self, rp_id: &str, credential_id: &[u8]) -> Result<u32, StoreError> {
        self.get(rp_id, credential_id)
            .map(|r| r.sign_count)
            .ok_or(StoreError::UnknownCredential)
    }

    pub fn public_key(&self, rp_id: &str, credential_id: &[u8]) -> Result<CosePublicKey, StoreError> {
        let record = self.get(rp_id, credential_id).ok_or(StoreError::UnknownCredential)?;
        record
            .public_key()
            .ok_or_else(|| StoreError::Corrupt("public key coordinates".into()))
    }

    /// Remove a credential by id; deletes its file and key.
    pub fn remove(&mut self, credential_id: &[u8]) -> Result<bool, StoreError> {
        let Ok(id) = CredentialId::try_from(credential_id) else {
            return Ok(false);
        };
        let Some(record) = self.by_id.get(&id) else {
            return Ok(false);
        };
        disk::delete_credential(&self.creds_dir, &record.credential_id)?;
        if let Err(e) = self.provider.delete_key(&record.binding_id) {
            tracing::warn!(binding = %record.binding_id, error = %e, "Failed to delete credential key");
        }
        self.unindex(&id);
        Ok(true)
    }

    pub fn credential_count(&self) -> usize {
        self.by_id.len()
    }
}
