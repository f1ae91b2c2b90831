use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use super::Authenticator;
use super::types::*;
use super::{get_assertion, get_info, make_credential};

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>, Ctap2Error>> + Send + 'a>>;
pub type Handler = for<'a> fn(&'a Authenticator, &'a [u8]) -> HandlerFuture<'a>;

struct Route {
    handler:  Handler,
    /// Needs the user and so holds the authenticator for its whole run.
    blocking: bool,
}

fn make_credential_route<'a>(auth: &'a Authenticator, body: &'a [u8]) -> HandlerFuture<'a> {
    Box::pin(make_credential::handle_make_credential(auth, body))
}

fn get_assertion_route<'a>(auth: &'a Authenticator, body: &'a [u8]) -> HandlerFuture<'a> {
    Box::pin(get_assertion::handle_get_assertion(auth, body))
}

fn get_info_route<'a>(auth: &'a Authenticator, body: &'a [u8]) -> HandlerFuture<'a> {
    Box::pin(get_info::handle_get_info(auth, body))
}

/// Routes CTAP2 command buffers to handlers and wraps the result in the
/// status-byte envelope.
pub struct Dispatcher {
    auth:   Authenticator,
    routes: HashMap<u8, Route>,
}

impl Dispatcher {
    pub fn new(auth: Authenticator) -> Self {
        let mut routes = HashMap::new();
        routes.insert(CTAP2_CMD_MAKE_CREDENTIAL, Route { handler: make_credential_route, blocking: true });
        routes.insert(CTAP2_CMD_GET_ASSERTION, Route { handler: get_assertion_route, blocking: true });
        routes.insert(CTAP2_CMD_GET_INFO, Route { handler: get_info_route, blocking: false });
        Self { auth, routes }
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.auth
    }

    /// `[command, cbor...]` in, `[status, cbor...]` out. Never fails; every
    /// error becomes a status byte.
    pub async fn dispatch(&self, buffer: &[u8]) -> Vec<u8> {
        let Some((&cmd, body)) = buffer.split_first() else {
            tracing::warn!("Empty CTAP2 request");
            return vec![Ctap2Error::InvalidParameter.status_byte()];
        };
        let Some(route) = self.routes.get(&cmd) else {
            tracing::warn!(cmd = format!("{cmd:#04x}"), "Unknown CTAP2 command");
            return vec![Ctap2Error::InvalidCommand.status_byte()];
        };

        let result = if route.blocking {
            let Some(guard) = self.auth.state.try_begin() else {
                tracing::info!(cmd = format!("{cmd:#04x}"), "Rejected: another operation is pending");
                return vec![Ctap2Error::UserActionPending.status_byte()];
            };
            tracing::debug!(cmd = format!("{cmd:#04x}"), flow = guard.flow(), "CTAP2 command");
            let result = (route.handler)(&self.auth, body).await;
            drop(guard);
            result
        } else {
            tracing::debug!(cmd = format!("{cmd:#04x}"), "CTAP2 command");
            (route.handler)(&self.auth, body).await
        };

        match result {
            Ok(cbor) => {
                let mut response = Vec::with_capacity(1 + cbor.len());
                response.push(CTAP2_OK);
                response.extend_from_slice(&cbor);
                response
            }
            Err(e) => {
                let status = e.status_byte();
                match &e {
                    Ctap2Error::Store(_) | Ctap2Error::Cbor(_) | Ctap2Error::Internal(_) => {
                        tracing::error!(cmd = format!("{cmd:#04x}"), status = format!("{status:#04x}"), error = %e, "CTAP2 command failed");
                    }
                    _ => {
                        tracing::warn!(cmd = format!("{cmd:#04x}"), status = format!("{status:#04x}"), error = %e, "CTAP2 command rejected");
                    }
                }
                vec![status]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SoftKeyProvider;
    use crate::store::CredentialStore;
    use crate::up::AuthenticatorState;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn dispatcher(dir: &std::path::Path) -> Dispatcher {
        let provider = Arc::new(SoftKeyProvider::open([1u8; 32], dir.join("keys")).unwrap());
        let store = CredentialStore::load([2u8; 32], dir.join("credentials"), provider).unwrap();
        Dispatcher::new(Authenticator::new(
            crate::config::AAGUID,
            Arc::new(Mutex::new(store)),
            AuthenticatorState::new(),
            Duration::from_millis(100),
        ))
    }

    #[tokio::test]
    async fn test_empty_buffer_is_invalid_parameter() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(dispatcher(dir.path()).dispatch(&[]).await, vec![0x02]);
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        assert_eq!(d.dispatch(&[0x03]).await, vec![0x01]);
        assert_eq!(d.dispatch(&[0x99, 0xA0]).await, vec![0x01]);
    }

    #[tokio::test]
    async fn test_malformed_body_resets_state() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        assert_eq!(d.dispatch(&[CTAP2_CMD_MAKE_CREDENTIAL, 0xFF]).await, vec![0x02]);
        assert!(d.authenticator().state().is_idle());
    }

    #[tokio::test]
    async fn test_blocking_command_rejected_while_busy() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let guard = d.authenticator().state().try_begin().unwrap();
        let before = d.authenticator().state().snapshot();

        assert_eq!(d.dispatch(&[CTAP2_CMD_GET_ASSERTION, 0xA0]).await, vec![0x23]);
        assert_eq!(d.authenticator().state().snapshot(), before);

        // GetInfo does not need the user
        let info = d.dispatch(&[CTAP2_CMD_GET_INFO]).await;
        assert_eq!(info[0], 0x00);
        drop(guard);
    }
}
