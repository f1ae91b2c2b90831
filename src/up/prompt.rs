use super::state::{CredentialChoice, Snapshot};

pub(crate) const PROMPT_TITLE: &str = "virtauthn";

pub(crate) struct UpPrompt {
    pub title: String,
    pub description: String,
}

fn account(choice: Option<&CredentialChoice>) -> &str {
    choice.map_or("(unknown)", |c| c.user.label())
}

pub(crate) fn verification_prompt(s: &Snapshot) -> UpPrompt {
    let site = s.rp_id.as_deref().unwrap_or("(unknown)");
    let account = account(s.selected_credential.as_ref());
    let description = if s.is_register {
        format!("Register new passkey\n\nSite: {site}\nAccount: {account}\n\nPress OK to create, or Cancel to deny.")
    } else {
        format!("Sign in with passkey\n\nSite: {site}\nAccount: {account}\n\nPress OK to sign in, or Cancel to deny.")
    };
    UpPrompt { title: PROMPT_TITLE.to_string(), description }
}

pub(crate) fn choice_prompt(rp_id: Option<&str>, choice: &CredentialChoice, index: usize, total: usize) -> UpPrompt {
    let site = rp_id.unwrap_or("(unknown)");
    UpPrompt {
        title: PROMPT_TITLE.to_string(),
        description: format!(
            "Choose account ({}/{total})\n\nSite: {site}\nAccount: {}\n\nPress OK to use this account, or Cancel for the next one.",
            index + 1,
            choice.user.label(),
        ),
    }
}
