use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::ctap2::types::{Ctap2Error, UserEntity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Processing,
    WaitingForUserVerification,
    VerificationSuccess,
    VerificationFailed,
    WaitingForChooseCredential,
    ChooseFinished,
    ChooseCanceled,
}

impl State {
    fn is_waiting(self) -> bool {
        matches!(self, State::WaitingForUserVerification | State::WaitingForChooseCredential)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialChoice {
    pub credential_id: Vec<u8>,
    pub user:          UserEntity,
}

/// Everything a confirmation surface needs, published as one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub flow:                u64,
    pub state:               State,
    pub rp_id:               Option<String>,
    pub is_register:         bool,
    pub selected_credential: Option<CredentialChoice>,
    pub pending_credentials: Vec<CredentialChoice>,
}

impl Snapshot {
    fn idle(flow: u64) -> Self {
        Self {
            flow,
            state: State::Idle,
            rp_id: None,
            is_register: false,
            selected_credential: None,
            pending_credentials: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    #[error("flow {0} is not active")]
    StaleFlow(u64),
    #[error("not waiting for this input (state {0:?})")]
    UnexpectedState(State),
    #[error("credential was not offered")]
    UnknownChoice,
}

/// Token proving the user approved the current operation. Only minted by
/// [`AuthenticatorState::verify_user`].
pub struct UserPresenceProof {
    pub(crate) _private: (),
}

impl UserPresenceProof {
    /// Construct a proof for use in tests only.
    /// Do not use in production code: this bypasses user verification.
    #[doc(hidden)]
    pub fn test_only() -> Self {
        Self { _private: () }
    }
}

/// Shared interaction state between the protocol handlers and the
/// confirmation surface.
#[derive(Clone)]
pub struct AuthenticatorState {
    tx: Arc<watch::Sender<Snapshot>>,
}

impl Default for AuthenticatorState {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds a flow open; dropping it returns the state to `Idle`.
pub struct FlowGuard {
    state: AuthenticatorState,
    flow:  u64,
}

impl FlowGuard {
    pub fn flow(&self) -> u64 {
        self.flow
    }
}

impl Drop for FlowGuard {
    fn drop(&mut self) {
        self.state.reset(self.flow);
    }
}

impl AuthenticatorState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Snapshot::idle(0));
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    pub fn is_idle(&self) -> bool {
        self.tx.borrow().state == State::Idle
    }

    /// `Idle -> Processing` under a fresh flow id, or `None` if busy.
    pub fn try_begin(&self) -> Option<FlowGuard> {
        let mut flow = None;
        self.tx.send_if_modified(|s| {
            if s.state != State::Idle {
                return false;
            }
            *s = Snapshot::idle(s.flow + 1);
            s.state = State::Processing;
            flow = Some(s.flow);
            true
        });
        flow.map(|flow| FlowGuard { state: self.clone(), flow })
    }

    pub(crate) fn reset(&self, flow: u64) {
        self.tx.send_if_modified(|s| {
            if s.flow != flow || s.state == State::Idle {
                return false;
            }
            *s = Snapshot::idle(flow);
            true
        });
    }

    /// Move the active flow into a waiting state. Returns the flow id.
    fn enter_wait(&self, update: impl FnOnce(&mut Snapshot)) -> Result<u64, Ctap2Error> {
        let mut result = Err(Ctap2Error::Internal("no active flow".into()));
        self.tx.send_if_modified(|s| {
            if s.state == State::Idle || s.state.is_waiting() {
                return false;
            }
            update(s);
            result = Ok(s.flow);
            true
        });
        result
    }

    /// Wait until `done` holds for the snapshot of `flow`, the flow ends, or
    /// `timeout` elapses.
    async fn wait_for(
        &self,
        flow: u64,
        timeout: Duration,
        done: impl Fn(State) -> bool,
    ) -> Result<Snapshot, Ctap2Error> {
        let mut rx = self.tx.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(|s| s.flow != flow || done(s.state))
                .await
                .map(|s| s.clone())
        })
        .await;
        match waited {
            Err(_) => {
                tracing::warn!(flow, "Timed out waiting for user");
                Err(Ctap2Error::UserActionTimeout)
            }
            Ok(Err(_)) => Err(Ctap2Error::Internal("state channel closed".into())),
            Ok(Ok(s)) if s.flow != flow => Err(Ctap2Error::Internal("flow ended while waiting".into())),
            Ok(Ok(s)) => Ok(s),
        }
    }

    /// Ask the surface to approve the operation and wait for the answer.
    pub async fn verify_user(
        &self,
        rp_id: &str,
        credential: Option<CredentialChoice>,
        is_register: bool,
        timeout: Duration,
    ) -> Result<UserPresenceProof, Ctap2Error> {
        let flow = self.enter_wait(|s| {
            s.state = State::WaitingForUserVerification;
            s.rp_id = Some(rp_id.to_string());
            s.selected_credential = credential;
            s.is_register = is_register;
        })?;
        tracing::debug!(flow, rp_id, is_register, "Waiting for user verification");

        let s = self
            .wait_for(flow, timeout, |st| {
                matches!(st, State::VerificationSuccess | State::VerificationFailed)
            })
            .await?;
        match s.state {
            State::VerificationSuccess => Ok(UserPresenceProof { _private: () }),
            _ => Err(Ctap2Error::OperationDenied),
        }
    }

    /// Offer `candidates` to the surface and wait for a pick.
    pub async fn choose_credential(
        &self,
        rp_id: &str,
        candidates: Vec<CredentialChoice>,
        timeout: Duration,
    ) -> Result<CredentialChoice, Ctap2Error> {
        let flow = self.enter_wait(|s| {
            s.state = State::WaitingForChooseCredential;
            s.rp_id = Some(rp_id.to_string());
            s.pending_credentials = candidates;
            s.selected_credential = None;
        })?;
        tracing::debug!(flow, rp_id, "Waiting for credential selection");

        let s = self
            .wait_for(flow, timeout, |st| {
                matches!(st, State::ChooseFinished | State::ChooseCanceled)
            })
            .await?;
        match (s.state, s.selected_credential) {
            (State::ChooseFinished, Some(choice)) => Ok(choice),
            _ => Err(Ctap2Error::OperationDenied),
        }
    }

    fn answer(
        &self,
        flow: u64,
        expected: State,
        apply: impl FnOnce(&mut Snapshot) -> Result<(), StateError>,
    ) -> Result<(), StateError> {
        let mut result = Ok(());
        self.tx.send_if_modified(|s| {
            if s.flow != flow {
                result = Err(StateError::StaleFlow(flow));
                return false;
            }
            if s.state != expected {
                result = Err(StateError::UnexpectedState(s.state));
                return false;
            }
            result = apply(s);
            result.is_ok()
        });
        result
    }

    /// Surface side: record the user's verification decision.
    pub fn complete_verification(&self, flow: u64, approved: bool) -> Result<(), StateError> {
        self.answer(flow, State::WaitingForUserVerification, |s| {
            s.state = if approved { State::VerificationSuccess } else { State::VerificationFailed };
            Ok(())
        })
    }

    /// Surface side: pick one of the pending credentials.
    pub fn finish_choice(&self, flow: u64, credential_id: &[u8]) -> Result<(), StateError> {
        self.answer(flow, State::WaitingForChooseCredential, |s| {
            let choice = s
                .pending_credentials
                .iter()
                .find(|c| c.credential_id == credential_id)
                .cloned()
                .ok_or(StateError::UnknownChoice)?;
            s.selected_credential = Some(choice);
            s.state = State::ChooseFinished;
            Ok(())
        })
    }

    pub fn cancel_choice(&self, flow: u64) -> Result<(), StateError> {
        self.answer(flow, State::WaitingForChooseCredential, |s| {
            s.state = State::ChooseCanceled;
            Ok(())
        })
    }
}
