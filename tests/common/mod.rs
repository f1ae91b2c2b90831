#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use virtauthn::ctap2::types::{
    CredentialDescriptor, CredentialParameters, GetAssertionRequest, MakeCredentialRequest,
    RelyingParty, UserEntity,
};
use virtauthn::keys::{KeyProvider, SoftKeyProvider};
use virtauthn::store::CredentialStore;
use virtauthn::up::{AuthenticatorState, Snapshot, State};
use virtauthn::{Authenticator, Dispatcher};

pub struct Harness {
    pub _tmp:       TempDir,
    pub dispatcher: Arc<Dispatcher>,
    pub state:      AuthenticatorState,
}

pub fn harness(confirm_timeout: Duration) -> Harness {
    harness_with(confirm_timeout, |tmp| {
        Arc::new(SoftKeyProvider::open([5u8; 32], tmp.path().join("keys")).unwrap())
    })
}

/// Like [`harness`], with the key provider built by `provider`.
pub fn harness_with(
    confirm_timeout: Duration,
    provider: impl FnOnce(&TempDir) -> Arc<dyn KeyProvider>,
) -> Harness {
    let tmp = TempDir::new().unwrap();
    let provider = provider(&tmp);
    let store = CredentialStore::load([6u8; 32], tmp.path().join("credentials"), provider).unwrap();
    let state = AuthenticatorState::new();
    let dispatcher = Arc::new(Dispatcher::new(Authenticator::new(
        virtauthn::config::AAGUID,
        Arc::new(Mutex::new(store)),
        state.clone(),
        confirm_timeout,
    )));
    Harness { _tmp: tmp, dispatcher, state }
}

/// What a simulated user does when asked.
#[derive(Clone, Copy)]
pub struct Behaviour {
    pub approve: bool,
    /// Index into the offered credentials, or `None` to cancel selection.
    pub pick:    Option<usize>,
}

pub const APPROVE: Behaviour = Behaviour { approve: true, pick: Some(0) };
pub const DENY: Behaviour = Behaviour { approve: false, pick: None };

/// Simulated confirmation surface. Every waiting snapshot it answers is
/// recorded in the returned log.
pub fn spawn_surface(
    state: AuthenticatorState,
    behaviour: Behaviour,
) -> (Arc<Mutex<Vec<Snapshot>>>, JoinHandle<()>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&log);
    let task = tokio::spawn(async move {
        let mut rx = state.subscribe();
        loop {
            let s = rx.borrow_and_update().clone();
            match s.state {
                State::WaitingForUserVerification => {
                    seen.lock().unwrap().push(s.clone());
                    let _ = state.complete_verification(s.flow, behaviour.approve);
                }
                State::WaitingForChooseCredential => {
                    seen.lock().unwrap().push(s.clone());
                    let _ = match behaviour.pick {
                        Some(i) => state.finish_choice(s.flow, &s.pending_credentials[i].credential_id),
                        None => state.cancel_choice(s.flow),
                    };
                }
                _ => {}
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    });
    (log, task)
}

pub fn user(id: &[u8], display: &str) -> UserEntity {
    UserEntity { id: id.to_vec(), name: Some(display.to_lowercase()), display_name: Some(display.into()) }
}

pub fn make_credential_cmd(rp_id: &str, user: UserEntity, cdh: &[u8], exclude: &[Vec<u8>]) -> Vec<u8> {
    let req = MakeCredentialRequest {
        client_data_hash: cdh.to_vec(),
        rp: RelyingParty { id: rp_id.into(), name: Some("Example".into()) },
        user,
        pub_key_cred_params: vec![CredentialParameters { cred_type: "public-key".into(), alg: -7 }],
        exclude_list: exclude.iter().map(|id| CredentialDescriptor::public_key(id)).collect(),
    };
    let mut cmd = vec![0x01];
    cmd.extend_from_slice(&req.to_cbor().unwrap());
    cmd
}

pub fn get_assertion_cmd(rp_id: &str, cdh: &[u8], allow: &[Vec<u8>]) -> Vec<u8> {
    let req = GetAssertionRequest {
        rp_id: rp_id.into(),
        client_data_hash: cdh.to_vec(),
        allow_list: allow.iter().map(|id| CredentialDescriptor::public_key(id)).collect(),
    };
    let mut cmd = vec![0x02];
    cmd.extend_from_slice(&req.to_cbor().unwrap());
    cmd
}
