use std::time::Duration;

use super::prompt::{UpPrompt, choice_prompt, verification_prompt};
use super::state::{AuthenticatorState, Snapshot, State};

/// Show one confirm/deny dialog. Any failure (missing binary, cancel,
/// timeout) counts as "no".
async fn confirm(prompt: &UpPrompt, pinentry_bin: &str, timeout: Duration) -> bool {
    let title = prompt.title.clone();
    let description = prompt.description.clone();
    let bin = pinentry_bin.to_string();

    let join = tokio::task::spawn_blocking(move || {
        let input = pinentry::PassphraseInput::with_binary(&bin);
        match input {
            None => Err(pinentry::Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "pinentry binary not found",
            ))),
            Some(mut input) => input
                .with_title(&title)
                .with_description(&description)
                .with_ok("Confirm")
                .with_cancel("Deny")
                .interact(),
        }
    });

    match tokio::time::timeout(timeout, join).await {
        Ok(Ok(Ok(_))) => true,
        Ok(Ok(Err(e))) => {
            tracing::info!(error = %e, "Confirmation declined");
            false
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "pinentry task failed");
            false
        }
        Err(_) => false,
    }
}

async fn handle(state: &AuthenticatorState, s: Snapshot, pinentry_bin: &str, timeout: Duration) {
    let outcome = match s.state {
        State::WaitingForUserVerification => {
            let approved = confirm(&verification_prompt(&s), pinentry_bin, timeout).await;
            tracing::info!(flow = s.flow, approved, "User verification answered");
            state.complete_verification(s.flow, approved)
        }
        State::WaitingForChooseCredential => {
            let total = s.pending_credentials.len();
            let mut picked = None;
            for (i, choice) in s.pending_credentials.iter().enumerate() {
                let prompt = choice_prompt(s.rp_id.as_deref(), choice, i, total);
                if confirm(&prompt, pinentry_bin, timeout).await {
                    picked = Some(choice.credential_id.clone());
                    break;
                }
            }
            match picked {
                Some(id) => state.finish_choice(s.flow, &id),
                None => state.cancel_choice(s.flow),
            }
        }
        _ => return,
    };
    if let Err(e) = outcome {
        // The flow moved on (timeout or reset) while the dialog was open.
        tracing::debug!(flow = s.flow, error = %e, "Discarding stale answer");
    }
}

/// Confirmation surface backed by pinentry. Watches the shared state and
/// answers every waiting flow exactly once.
pub async fn run_confirmation_surface(state: AuthenticatorState, pinentry_bin: String, timeout: Duration) {
    let mut rx = state.subscribe();
    let mut answered: Option<(u64, State)> = None;
    loop {
        let s = rx.borrow_and_update().clone();
        let key = (s.flow, s.state);
        if matches!(s.state, State::WaitingForUserVerification | State::WaitingForChooseCredential)
            && answered != Some(key)
        {
            answered = Some(key);
            handle(&state, s, &pinentry_bin, timeout).await;
            continue;
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}
