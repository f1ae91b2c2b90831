pub mod attestation;
pub mod authenticator_data;
pub mod dispatch;
pub mod get_assertion;
pub mod get_info;
pub mod make_credential;
pub mod types;

pub use dispatch::Dispatcher;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::store::{CredentialStore, StoreError};
use crate::up::AuthenticatorState;
use types::Ctap2Error;

/// Process-wide authenticator context handed to every command handler.
pub struct Authenticator {
    pub(crate) aaguid:          [u8; 16],
    pub(crate) store:           Arc<Mutex<CredentialStore>>,
    pub(crate) state:           AuthenticatorState,
    pub(crate) confirm_timeout: Duration,
}

impl Authenticator {
    pub fn new(
        aaguid: [u8; 16],
        store: Arc<Mutex<CredentialStore>>,
        state: AuthenticatorState,
        confirm_timeout: Duration,
    ) -> Self {
        Self { aaguid, store, state, confirm_timeout }
    }

    pub fn state(&self) -> &AuthenticatorState {
        &self.state
    }

    pub fn store(&self) -> &Arc<Mutex<CredentialStore>> {
        &self.store
    }

    /// Run `f` against the store on the blocking pool.
    pub(crate) async fn with_store<T, F>(&self, f: F) -> Result<T, Ctap2Error>
    where
        T: Send + 'static,
        F: FnOnce(&mut CredentialStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let mut guard = store.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| Ctap2Error::Internal(e.to_string()))?
        .map_err(Ctap2Error::from)
    }
}
