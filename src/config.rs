use std::time::Duration;

use crate::error::Error;
use crate::guard::GuardConfig;
use crate::identity::TokenRequest;
use crate::session_store::DEFAULT_STORAGE_KEY;

/// Session service configuration.
///
/// Use [`from_env()`](SessionConfig::from_env) for convention-based setup,
/// or [`new()`](SessionConfig::new) with `with_*` methods for full control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub(crate) storage_key: String,
    pub(crate) settle_delay: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) staff_session_ttl: Duration,
    pub(crate) token_scopes: Vec<String>,
    pub(crate) guard: GuardConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.into(),
            settle_delay: Duration::from_millis(500),
            poll_interval: Duration::from_millis(200),
            staff_session_ttl: Duration::from_secs(8 * 60 * 60),
            token_scopes: vec!["User.Read".into()],
            guard: GuardConfig::default(),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create config from environment variables.
    ///
    /// # Optional env vars
    /// - `COURSE_SESSION_STORAGE_KEY`: storage key of the staff session
    /// - `COURSE_SESSION_SETTLE_MS`: settle delay in milliseconds
    /// - `COURSE_SESSION_POLL_MS`: storage poll interval in milliseconds
    /// - `COURSE_SESSION_STAFF_TTL_SECS`: staff session lifetime when the API states none
    /// - `COURSE_API_SCOPES`: comma-separated scopes for the API access token
    /// - `COURSE_LANDING_ROUTE`, `COURSE_HOME_ROUTE`: guard redirect targets
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a numeric variable does not parse or is zero.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::new();

        if let Some(key) = lookup("COURSE_SESSION_STORAGE_KEY") {
            config = config.with_storage_key(key);
        }
        if let Some(ms) = positive(&lookup, "COURSE_SESSION_SETTLE_MS")? {
            config = config.with_settle_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = positive(&lookup, "COURSE_SESSION_POLL_MS")? {
            config = config.with_poll_interval(Duration::from_millis(ms));
        }
        if let Some(secs) = positive(&lookup, "COURSE_SESSION_STAFF_TTL_SECS")? {
            config = config.with_staff_session_ttl(Duration::from_secs(secs));
        }
        if let Some(scopes) = lookup("COURSE_API_SCOPES") {
            config = config.with_token_scopes(
                scopes
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }
        if let Some(route) = lookup("COURSE_LANDING_ROUTE") {
            config.guard.landing_route = route;
        }
        if let Some(route) = lookup("COURSE_HOME_ROUTE") {
            config.guard.home_route = route;
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_staff_session_ttl(mut self, ttl: Duration) -> Self {
        self.staff_session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_token_scopes(mut self, scopes: Vec<String>) -> Self {
        self.token_scopes = scopes;
        self
    }

    #[must_use]
    pub fn with_guard(mut self, guard: GuardConfig) -> Self {
        self.guard = guard;
        self
    }

    #[must_use]
    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn staff_session_ttl(&self) -> Duration {
        self.staff_session_ttl
    }

    #[must_use]
    pub fn guard(&self) -> &GuardConfig {
        &self.guard
    }

    /// Token request for the enrollment API.
    #[must_use]
    pub fn token_request(&self) -> TokenRequest {
        TokenRequest::new(self.token_scopes.clone())
    }
}

fn positive(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<u64>, Error> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(Error::Config(format!("{name} must be greater than zero"))),
        Ok(value) => Ok(Some(value)),
        Err(e) => Err(Error::Config(format!("{name}: {e}"))),
    }
}
