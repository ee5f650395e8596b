//! Interactive credential provider.

use dialoguer::{Input, Password};
use shellyscan_core::{AuthScheme, CredentialProvider, CredentialRequest, Credentials};

/// Asks on the terminal. An empty password aborts authentication for the
/// device, and so does a non-interactive stdin.
pub struct TerminalCredentials;

impl CredentialProvider for TerminalCredentials {
    fn credentials(&self, request: &CredentialRequest) -> Option<Credentials> {
        if request.retry {
            eprintln!("Credentials rejected by {}", request.device);
        }

        let user = match request.scheme {
            AuthScheme::Basic => Input::<String>::new()
                .with_prompt(format!("{} user", request.device))
                .allow_empty(true)
                .interact_text()
                .ok()
                .filter(|u| !u.is_empty())?,
            // Digest devices have one fixed account.
            AuthScheme::Digest => String::new(),
        };

        let password = Password::new()
            .with_prompt(format!("{} password", request.device))
            .allow_empty_password(true)
            .interact()
            .ok()
            .filter(|p| !p.is_empty())?;

        Some(Credentials::new(user, password))
    }
}
