use std::future::Future;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::Result;
use crate::types::ObjectId;

/// What the identity provider is busy with right now.
///
/// Nothing should be concluded from the account list unless this is
/// [`InteractionStatus::None`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "camelCase")]
pub enum InteractionStatus {
    /// Client constructed but not yet initialized.
    #[default]
    #[display("startup")]
    Startup,
    #[display("none")]
    None,
    #[display("login")]
    Login,
    #[display("ssoSilent")]
    SsoSilent,
    #[display("logout")]
    Logout,
}

/// An account currently signed in with the SSO provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SsoAccount {
    pub home_account_id: String,
    pub object_id: ObjectId,
    /// Sign-in name; usually the institutional email.
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl SsoAccount {
    /// Display name, falling back to the username.
    #[must_use]
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.username,
        }
    }
}

/// Scopes requested for an access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub scopes: Vec<String>,
}

impl TokenRequest {
    #[must_use]
    pub fn new(scopes: Vec<String>) -> Self {
        Self { scopes }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogoutOptions {
    /// Account to sign out; `None` signs out every cached account.
    pub account: Option<SsoAccount>,
    pub post_logout_redirect_uri: Option<String>,
}

/// Enterprise SSO client as seen by the session reconciler.
///
/// The reconciler never creates or destroys SSO sessions itself; it reads the
/// account list and status, and asks for tokens.
pub trait IdentityProvider: Send + Sync + 'static {
    /// Accounts currently signed in.
    fn accounts(&self) -> Vec<SsoAccount>;

    fn interaction_status(&self) -> InteractionStatus;

    /// Status changes, starting from the current value.
    fn subscribe_status(&self) -> watch::Receiver<InteractionStatus>;

    /// Access token for `account` without user interaction.
    fn acquire_token_silent(
        &self,
        request: &TokenRequest,
        account: &SsoAccount,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Interactive sign-in.
    fn login_interactive(
        &self,
        request: &TokenRequest,
    ) -> impl Future<Output = Result<SsoAccount>> + Send;

    fn logout(&self, options: &LogoutOptions) -> impl Future<Output = Result<()>> + Send;
}
