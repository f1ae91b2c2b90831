pub mod pinentry;
pub(crate) mod prompt;
pub mod state;

pub use pinentry::run_confirmation_surface;
pub use state::{AuthenticatorState, CredentialChoice, FlowGuard, Snapshot, State, StateError, UserPresenceProof};
