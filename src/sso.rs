//! Enterprise SSO client: `OAuth2` authorization code flow with PKCE against an
//! OpenID Connect provider (Microsoft Entra ID style endpoints).
//!
//! The interactive leg needs a browser. [`SsoClient::authorization_url`] hands
//! the host a URL to open, and [`SsoClient::handle_redirect`] completes the
//! sign-in from the redirect's query parameters.

use std::sync::{Mutex, MutexGuard};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use url::Url;

use crate::error::{Error, Result};
use crate::identity::{
    IdentityProvider, InteractionStatus, LogoutOptions, SsoAccount, TokenRequest,
};
use crate::types::ObjectId;

/// Refresh access tokens this long before they expire.
const EXPIRY_SKEW_SECS: i64 = 300;

/// SSO client configuration.
///
/// Required fields are constructor parameters; endpoints derive from the
/// authority unless overridden.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SsoConfig {
    pub(crate) client_id: String,
    pub(crate) authority: Url,
    pub(crate) redirect_uri: Url,
    pub(crate) userinfo_url: Option<Url>,
    pub(crate) post_logout_redirect_uri: Option<Url>,
    pub(crate) scopes: Vec<String>,
}

impl SsoConfig {
    /// `authority` is the tenant base, e.g. `https://login.microsoftonline.com/<tenant>/`.
    #[must_use]
    pub fn new(client_id: impl Into<String>, mut authority: Url, redirect_uri: Url) -> Self {
        if !authority.path().ends_with('/') {
            let path = format!("{}/", authority.path());
            authority.set_path(&path);
        }
        Self {
            client_id: client_id.into(),
            authority,
            redirect_uri,
            userinfo_url: None,
            post_logout_redirect_uri: None,
            scopes: vec![
                "openid".into(),
                "profile".into(),
                "email".into(),
                "offline_access".into(),
            ],
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `SSO_CLIENT_ID`: application (client) ID
    /// - `SSO_AUTHORITY`: tenant authority URL
    /// - `SSO_REDIRECT_URI`: registered redirect URI
    ///
    /// # Optional env vars
    /// - `SSO_SCOPES`: comma-separated scopes
    /// - `SSO_USERINFO_URL`: override the userinfo endpoint
    /// - `SSO_POST_LOGOUT_REDIRECT_URI`: where the provider returns after logout
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if required env vars are missing or URLs are invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| {
            lookup(name).ok_or_else(|| Error::Config(format!("{name} is required")))
        };
        let url = |name: &str, raw: String| {
            raw.parse::<Url>()
                .map_err(|e| Error::Config(format!("{name}: {e}")))
        };

        let client_id = required("SSO_CLIENT_ID")?;
        let authority = url("SSO_AUTHORITY", required("SSO_AUTHORITY")?)?;
        let redirect_uri = url("SSO_REDIRECT_URI", required("SSO_REDIRECT_URI")?)?;

        let mut config = Self::new(client_id, authority, redirect_uri);
        if let Some(scopes) = lookup("SSO_SCOPES") {
            config = config.with_scopes(scopes.split(',').map(|s| s.trim().to_string()).collect());
        }
        if let Some(raw) = lookup("SSO_USERINFO_URL") {
            config = config.with_userinfo_url(url("SSO_USERINFO_URL", raw)?);
        }
        if let Some(raw) = lookup("SSO_POST_LOGOUT_REDIRECT_URI") {
            config = config.with_post_logout_redirect_uri(url("SSO_POST_LOGOUT_REDIRECT_URI", raw)?);
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn with_userinfo_url(mut self, url: Url) -> Self {
        self.userinfo_url = Some(url);
        self
    }

    #[must_use]
    pub fn with_post_logout_redirect_uri(mut self, url: Url) -> Self {
        self.post_logout_redirect_uri = Some(url);
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn authority(&self) -> &Url {
        &self.authority
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] if the authority cannot be joined.
    pub fn authorize_endpoint(&self) -> Result<Url> {
        self.endpoint("oauth2/v2.0/authorize")
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] if the authority cannot be joined.
    pub fn token_endpoint(&self) -> Result<Url> {
        self.endpoint("oauth2/v2.0/token")
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] if the authority cannot be joined.
    pub fn logout_endpoint(&self) -> Result<Url> {
        self.endpoint("oauth2/v2.0/logout")
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] if the authority cannot be joined.
    pub fn userinfo_endpoint(&self) -> Result<Url> {
        match &self.userinfo_url {
            Some(url) => Ok(url.clone()),
            None => self.endpoint("oidc/userinfo"),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.authority
            .join(path)
            .map_err(|e| Error::Config(format!("authority endpoint {path}: {e}")))
    }
}

/// Authorization URL plus the PKCE parameters kept until the redirect returns.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub code_verifier: String,
}

/// Query parameters the provider appends to the redirect URI.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedirectParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl TokenResponse {
    /// Providers omit the refresh token when they do not rotate it.
    fn keeping_refresh_token(mut self, previous: String) -> Self {
        self.refresh_token.get_or_insert(previous);
        self
    }
}

/// OpenID Connect userinfo claims we use.
#[derive(Debug, Clone, Deserialize)]
struct UserInfo {
    sub: String,
    #[serde(default)]
    oid: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

impl UserInfo {
    fn into_account(self, tenant_hint: &str) -> SsoAccount {
        let object_id = self.oid.clone().unwrap_or_else(|| self.sub.clone());
        SsoAccount {
            home_account_id: format!("{object_id}.{tenant_hint}"),
            object_id: ObjectId(object_id),
            username: self
                .preferred_username
                .or(self.email)
                .unwrap_or_else(|| self.sub.clone()),
            name: self.name,
        }
    }
}

struct CachedAccount {
    account: SsoAccount,
    access_token: String,
    /// Unix seconds.
    expires_at: i64,
    refresh_token: Option<String>,
}

struct PendingLogin {
    state: String,
    code_verifier: String,
}

/// SSO client with an in-memory account cache.
pub struct SsoClient {
    config: SsoConfig,
    http: reqwest::Client,
    accounts: Mutex<Vec<CachedAccount>>,
    pending: Mutex<Option<PendingLogin>>,
    status: watch::Sender<InteractionStatus>,
}

impl SsoClient {
    /// Create a client in [`InteractionStatus::Startup`]; call
    /// [`initialize`](Self::initialize) once the host is ready.
    #[must_use]
    pub fn new(config: SsoConfig) -> Self {
        let (status, _) = watch::channel(InteractionStatus::Startup);
        Self {
            config,
            http: reqwest::Client::new(),
            accounts: Mutex::new(Vec::new()),
            pending: Mutex::new(None),
            status,
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SsoConfig {
        &self.config
    }

    /// Finish startup. Until then the session stays unresolved.
    pub fn initialize(&self) {
        self.set_status(InteractionStatus::None);
    }

    /// Begin an interactive sign-in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InteractionInProgress`] if another interaction is
    /// running, or [`Error::Config`] for a bad authority.
    pub fn authorization_url(&self, request: &TokenRequest) -> Result<AuthorizationRequest> {
        let status = *self.status.borrow();
        if status != InteractionStatus::None {
            return Err(Error::InteractionInProgress(status));
        }

        let request = self.build_authorization(request)?;
        *lock(&self.pending)? = Some(PendingLogin {
            state: request.state.clone(),
            code_verifier: request.code_verifier.clone(),
        });
        self.set_status(InteractionStatus::Login);
        Ok(request)
    }

    fn build_authorization(&self, request: &TokenRequest) -> Result<AuthorizationRequest> {
        let state = new_state();
        let code_verifier = new_code_verifier();
        let code_challenge = code_challenge_s256(&code_verifier);
        let scope = self.scope_string(request);

        let mut url = self.config.authorize_endpoint()?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("response_mode", "query")
            .append_pair("state", &state)
            .append_pair("code_challenge", &code_challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("scope", &scope);

        Ok(AuthorizationRequest {
            url: url.into(),
            state,
            code_verifier,
        })
    }

    /// Complete an interactive sign-in from the redirect parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OAuth`] on provider errors or state mismatch, and
    /// [`Error::Http`] on network failure. The client returns to idle either way.
    pub async fn handle_redirect(&self, params: RedirectParams) -> Result<SsoAccount> {
        let result = self.complete_login(params).await;
        self.set_status(InteractionStatus::None);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "SSO redirect handling failed");
        }
        result
    }

    async fn complete_login(&self, params: RedirectParams) -> Result<SsoAccount> {
        let pending = lock(&self.pending)?.take();

        if let Some(error) = params.error {
            let detail = params.error_description.unwrap_or(error);
            return Err(oauth_error("authorize", None, detail));
        }
        let pending = pending.ok_or_else(|| oauth_error("authorize", None, "no pending login"))?;
        let code = params
            .code
            .ok_or_else(|| oauth_error("authorize", None, "missing_code"))?;
        if params.state.as_deref() != Some(pending.state.as_str()) {
            tracing::warn!("SSO state mismatch");
            return Err(oauth_error("authorize", None, "state_mismatch"));
        }

        let scope = self.config.scopes.join(" ");
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("code", code.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", pending.code_verifier.as_str()),
            ("scope", scope.as_str()),
        ];
        let tokens = self.token_request(&form, "token exchange").await?;
        let user_info = self.user_info(&tokens.access_token).await?;

        let account = user_info.into_account(self.tenant_hint());
        self.cache(account.clone(), tokens)?;
        tracing::info!(username = %account.username, "SSO sign-in complete");
        Ok(account)
    }

    /// End-session URL for `options`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a bad authority.
    pub fn logout_url(&self, options: &LogoutOptions) -> Result<Url> {
        let mut url = self.config.logout_endpoint()?;
        {
            let mut query = url.query_pairs_mut();
            let redirect = options
                .post_logout_redirect_uri
                .clone()
                .or_else(|| self.config.post_logout_redirect_uri.as_ref().map(Url::to_string));
            if let Some(redirect) = redirect {
                query.append_pair("post_logout_redirect_uri", &redirect);
            }
            if let Some(account) = &options.account {
                query.append_pair("logout_hint", &account.username);
            }
        }
        Ok(url)
    }

    fn scope_string(&self, request: &TokenRequest) -> String {
        let mut scopes = self.config.scopes.clone();
        for scope in &request.scopes {
            if !scopes.contains(scope) {
                scopes.push(scope.clone());
            }
        }
        scopes.join(" ")
    }

    fn tenant_hint(&self) -> &str {
        self.config
            .authority
            .path_segments()
            .and_then(|mut segments| segments.find(|s| !s.is_empty()))
            .unwrap_or("common")
    }

    fn cache(&self, account: SsoAccount, tokens: TokenResponse) -> Result<()> {
        let entry = CachedAccount {
            account,
            expires_at: now_secs().saturating_add(tokens.expires_in.unwrap_or(3600)),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        };
        let mut accounts = lock(&self.accounts)?;
        accounts.retain(|c| c.account.home_account_id != entry.account.home_account_id);
        accounts.push(entry);
        Ok(())
    }

    async fn token_request(
        &self,
        form: &[(&str, &str)],
        operation: &'static str,
    ) -> Result<TokenResponse> {
        let response = self
            .http
            .post(self.config.token_endpoint()?)
            .form(form)
            .send()
            .await?;
        let response = Self::ensure_success(response, operation).await?;
        response.json::<TokenResponse>().await.map_err(Into::into)
    }

    async fn user_info(&self, access_token: &str) -> Result<UserInfo> {
        let response = self
            .http
            .get(self.config.userinfo_endpoint()?)
            .bearer_auth(access_token)
            .send()
            .await?;
        let response = Self::ensure_success(response, "userinfo request").await?;
        response.json::<UserInfo>().await.map_err(Into::into)
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(oauth_error(operation, Some(status), body))
    }

    fn set_status(&self, status: InteractionStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

impl IdentityProvider for SsoClient {
    fn accounts(&self) -> Vec<SsoAccount> {
        match lock(&self.accounts) {
            Ok(accounts) => accounts.iter().map(|c| c.account.clone()).collect(),
            Err(e) => {
                tracing::error!(error = %e, "SSO account cache unavailable");
                Vec::new()
            }
        }
    }

    fn interaction_status(&self) -> InteractionStatus {
        *self.status.borrow()
    }

    fn subscribe_status(&self) -> watch::Receiver<InteractionStatus> {
        self.status.subscribe()
    }

    async fn acquire_token_silent(
        &self,
        request: &TokenRequest,
        account: &SsoAccount,
    ) -> Result<String> {
        let refresh_token = {
            let accounts = lock(&self.accounts)?;
            let cached = accounts
                .iter()
                .find(|c| c.account.home_account_id == account.home_account_id)
                .ok_or_else(|| Error::Identity(format!("{} is not signed in", account.username)))?;
            if cached.expires_at - EXPIRY_SKEW_SECS > now_secs() {
                return Ok(cached.access_token.clone());
            }
            cached.refresh_token.clone()
        };

        let Some(refresh_token) = refresh_token else {
            let url = self.build_authorization(request)?.url;
            return Err(Error::InteractionRequired { url });
        };

        let scope = self.scope_string(request);
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("scope", scope.as_str()),
        ];
        let tokens = self.token_request(&form, "token refresh").await?;
        let tokens = tokens.keeping_refresh_token(refresh_token);
        let access_token = tokens.access_token.clone();
        self.cache(account.clone(), tokens)?;
        tracing::debug!(username = %account.username, "Access token refreshed");
        Ok(access_token)
    }

    /// Without a browser to drive, this starts the flow and reports the URL the
    /// host must open; the sign-in completes in [`SsoClient::handle_redirect`].
    async fn login_interactive(&self, request: &TokenRequest) -> Result<SsoAccount> {
        let url = self.authorization_url(request)?.url;
        Err(Error::InteractionRequired { url })
    }

    async fn logout(&self, options: &LogoutOptions) -> Result<()> {
        let url = self.logout_url(options)?;
        self.set_status(InteractionStatus::Logout);
        let removed = lock(&self.accounts).map(|mut accounts| {
            let before = accounts.len();
            match &options.account {
                Some(account) => {
                    accounts.retain(|c| c.account.home_account_id != account.home_account_id);
                }
                None => accounts.clear(),
            }
            before - accounts.len()
        });
        self.set_status(InteractionStatus::None);
        let removed = removed?;
        tracing::info!(removed, end_session = %url, "SSO sign-out");
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::Identity("SSO client lock poisoned".into()))
}

fn oauth_error(operation: &'static str, status: Option<u16>, detail: impl Into<String>) -> Error {
    Error::OAuth {
        operation,
        status,
        detail: detail.into(),
    }
}

fn now_secs() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// 64-character URL-safe PKCE code verifier (RFC 7636: 43-128 chars).
fn new_code_verifier() -> String {
    let random_bytes: [u8; 48] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// `BASE64URL(SHA256(verifier))`
fn code_challenge_s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn new_state() -> String {
    let random_bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn test_config() -> SsoConfig {
        SsoConfig::new(
            "enroll-spa",
            "https://login.microsoftonline.com/tecnm".parse().unwrap(),
            "https://enroll.example.edu/auth/callback".parse().unwrap(),
        )
    }

    fn ready_client() -> SsoClient {
        let client = SsoClient::new(test_config());
        client.initialize();
        client
    }

    #[test]
    fn endpoints_derive_from_authority() {
        let config = test_config();
        assert_eq!(
            config.authorize_endpoint().unwrap().as_str(),
            "https://login.microsoftonline.com/tecnm/oauth2/v2.0/authorize"
        );
        assert_eq!(
            config.token_endpoint().unwrap().as_str(),
            "https://login.microsoftonline.com/tecnm/oauth2/v2.0/token"
        );
    }

    #[test]
    fn authorization_url_contains_pkce() {
        let client = ready_client();
        let req = client
            .authorization_url(&TokenRequest::new(vec!["User.Read".into()]))
            .unwrap();

        assert!(req.url.contains("code_challenge="));
        assert!(req.url.contains("code_challenge_method=S256"));
        assert!(req.url.contains("response_type=code"));
        assert!(req.url.contains("client_id=enroll-spa"));
        assert!(req.url.contains("User.Read"));
        assert!(!req.code_verifier.is_empty());
        assert_eq!(client.interaction_status(), InteractionStatus::Login);
    }

    #[test]
    fn authorization_refused_while_busy() {
        let client = SsoClient::new(test_config());
        assert!(matches!(
            client.authorization_url(&TokenRequest::new(vec![])),
            Err(Error::InteractionInProgress(InteractionStatus::Startup))
        ));
    }

    #[tokio::test]
    async fn redirect_with_wrong_state_fails_and_goes_idle() {
        let client = ready_client();
        client
            .authorization_url(&TokenRequest::new(vec![]))
            .unwrap();
        let err = client
            .handle_redirect(RedirectParams {
                code: Some("abc".into()),
                state: Some("forged".into()),
                ..RedirectParams::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OAuth { detail, .. } if detail == "state_mismatch"));
        assert_eq!(client.interaction_status(), InteractionStatus::None);
    }

    #[tokio::test]
    async fn provider_error_is_reported() {
        let client = ready_client();
        client
            .authorization_url(&TokenRequest::new(vec![]))
            .unwrap();
        let err = client
            .handle_redirect(RedirectParams {
                error: Some("access_denied".into()),
                error_description: Some("User cancelled".into()),
                ..RedirectParams::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OAuth { detail, .. } if detail == "User cancelled"));
    }

    #[tokio::test]
    async fn login_interactive_reports_url() {
        let client = ready_client();
        let err = client
            .login_interactive(&TokenRequest::new(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InteractionRequired { url } if url.contains("authorize")));
    }

    #[tokio::test]
    async fn silent_token_served_from_cache() {
        let client = ready_client();
        let info = UserInfo {
            sub: "sub-1".into(),
            oid: Some("oid-1".into()),
            name: Some("Luis Pérez".into()),
            preferred_username: Some("l20240001@example.edu".into()),
            email: None,
        };
        let account = info.into_account("tecnm");
        client
            .cache(
                account.clone(),
                TokenResponse {
                    access_token: "cached".into(),
                    expires_in: Some(3600),
                    refresh_token: None,
                },
            )
            .unwrap();

        assert_eq!(client.accounts(), vec![account.clone()]);
        let token = client
            .acquire_token_silent(&TokenRequest::new(vec![]), &account)
            .await
            .unwrap();
        assert_eq!(token, "cached");

        client
            .logout(&LogoutOptions {
                account: Some(account),
                post_logout_redirect_uri: None,
            })
            .await
            .unwrap();
        assert!(client.accounts().is_empty());
        assert_eq!(client.interaction_status(), InteractionStatus::None);
    }

    #[tokio::test]
    async fn huge_token_lifetime_saturates() {
        let client = ready_client();
        let account = UserInfo {
            sub: "sub-1".into(),
            oid: None,
            name: None,
            preferred_username: None,
            email: None,
        }
        .into_account("tecnm");
        client
            .cache(
                account.clone(),
                TokenResponse {
                    access_token: "forever".into(),
                    expires_in: Some(i64::MAX),
                    refresh_token: None,
                },
            )
            .unwrap();
        let token = client
            .acquire_token_silent(&TokenRequest::new(vec![]), &account)
            .await
            .unwrap();
        assert_eq!(token, "forever");
    }

    #[test]
    fn refresh_without_rotation_keeps_previous_token() {
        let unrotated = TokenResponse {
            access_token: "a2".into(),
            expires_in: Some(3600),
            refresh_token: None,
        }
        .keeping_refresh_token("r1".into());
        assert_eq!(unrotated.refresh_token.as_deref(), Some("r1"));

        let rotated = TokenResponse {
            access_token: "a3".into(),
            expires_in: Some(3600),
            refresh_token: Some("r2".into()),
        }
        .keeping_refresh_token("r1".into());
        assert_eq!(rotated.refresh_token.as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn expired_token_without_refresh_requires_interaction() {
        let client = ready_client();
        let account = UserInfo {
            sub: "sub-1".into(),
            oid: None,
            name: None,
            preferred_username: None,
            email: Some("l@example.edu".into()),
        }
        .into_account("tecnm");
        client
            .cache(
                account.clone(),
                TokenResponse {
                    access_token: "old".into(),
                    expires_in: Some(10),
                    refresh_token: None,
                },
            )
            .unwrap();
        let err = client
            .acquire_token_silent(&TokenRequest::new(vec![]), &account)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InteractionRequired { .. }));
        assert_eq!(client.interaction_status(), InteractionStatus::None);
    }

    #[test]
    fn account_from_userinfo() {
        let account = UserInfo {
            sub: "sub-1".into(),
            oid: Some("oid-1".into()),
            name: None,
            preferred_username: None,
            email: Some("l@example.edu".into()),
        }
        .into_account("tecnm");
        assert_eq!(account.object_id, ObjectId("oid-1".into()));
        assert_eq!(account.home_account_id, "oid-1.tecnm");
        assert_eq!(account.display_name(), "l@example.edu");
    }

    #[test]
    fn logout_url_carries_hint_and_redirect() {
        let client = ready_client();
        let url = client
            .logout_url(&LogoutOptions {
                account: Some(SsoAccount {
                    home_account_id: "h".into(),
                    object_id: ObjectId("o".into()),
                    username: "l@example.edu".into(),
                    name: None,
                }),
                post_logout_redirect_uri: Some("https://enroll.example.edu/".into()),
            })
            .unwrap();
        let query: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query["logout_hint"], "l@example.edu");
        assert_eq!(query["post_logout_redirect_uri"], "https://enroll.example.edu/");
    }

    #[test]
    fn config_from_env_requires_client_id() {
        let err = SsoConfig::from_lookup(|_| None).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("SSO_CLIENT_ID")));
    }

    #[test]
    fn config_from_env() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SSO_CLIENT_ID", "enroll-spa"),
            ("SSO_AUTHORITY", "https://login.microsoftonline.com/tecnm/"),
            ("SSO_REDIRECT_URI", "https://enroll.example.edu/auth/callback"),
            ("SSO_SCOPES", "openid, profile"),
        ]);
        let config = SsoConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(config.client_id(), "enroll-spa");
        assert_eq!(config.scopes(), &["openid", "profile"]);
    }

    #[test]
    fn pkce_values() {
        let verifier = new_code_verifier();
        assert_eq!(verifier.len(), 64);
        assert!(
            verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_ne!(verifier, new_code_verifier());
        assert_eq!(code_challenge_s256("v"), code_challenge_s256("v"));
        assert_ne!(code_challenge_s256("v1"), code_challenge_s256("v2"));
        assert_eq!(new_state().len(), 22);
    }
}
