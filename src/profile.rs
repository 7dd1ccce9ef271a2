//! Student and staff profile fetching.
//!
//! [`ProfileApi`] is the network side. [`ProfileQuery`] is the gating contract
//! around it: a query only fires while enabled, never retries on its own,
//! keeps at most one request in flight, and forgets its data the moment it is
//! disabled.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::session_store::StaffSessionRecord;
use crate::types::{ObjectId, StaffProfile, StudentData, StudentProfile};

/// Staff sign-in form contents.
#[derive(Debug, Clone, Serialize)]
pub struct StaffCredentials {
    pub email: String,
    pub password: String,
}

impl StaffCredentials {
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Successful staff credential exchange.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffLoginResponse {
    pub token: String,
    pub user: StaffProfile,
    /// Lifetime in seconds, when the API states one.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl StaffLoginResponse {
    /// Turn the response into a record expiring at `expires_in`, or after
    /// `default_ttl_ms` when the API did not say.
    #[must_use]
    pub fn into_record(self, now_millis: i64, default_ttl_ms: i64) -> StaffSessionRecord {
        let ttl = self
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map_or(default_ttl_ms, |secs| secs.saturating_mul(1000));
        StaffSessionRecord::new(self.token, self.user, now_millis.saturating_add(ttl))
    }
}

/// Upstream enrollment API, as far as sessions are concerned.
pub trait ProfileApi: Send + Sync + 'static {
    /// Profile of the SSO-authenticated student.
    fn student_profile(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<StudentProfile, FetchError>> + Send;

    /// Enrollment data for a student; `None` if the student has none yet.
    fn student_data(
        &self,
        token: &str,
        object_id: &ObjectId,
    ) -> impl Future<Output = Result<Option<StudentData>, FetchError>> + Send;

    /// Profile of the staff member owning `token`.
    fn staff_profile(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<StaffProfile, FetchError>> + Send;

    /// Exchange staff credentials for a token.
    fn staff_login(
        &self,
        credentials: &StaffCredentials,
    ) -> impl Future<Output = Result<StaffLoginResponse, FetchError>> + Send;
}

/// Handle for one issued request. Results carrying an outdated ticket are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTicket {
    generation: u64,
}

/// Point-in-time view of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySnapshot<T> {
    pub data: Option<T>,
    pub is_loading: bool,
    pub error: Option<FetchError>,
}

/// Conditionally enabled request state.
#[derive(Debug, Clone)]
pub struct ProfileQuery<T> {
    enabled: bool,
    in_flight: bool,
    generation: u64,
    data: Option<T>,
    error: Option<FetchError>,
}

impl<T> Default for ProfileQuery<T> {
    fn default() -> Self {
        Self {
            enabled: false,
            in_flight: false,
            generation: 0,
            data: None,
            error: None,
        }
    }
}

impl<T: Clone> ProfileQuery<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enabled and not yet settled.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.enabled && (self.in_flight || (self.data.is_none() && self.error.is_none()))
    }

    #[must_use]
    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    #[must_use]
    pub fn error(&self) -> Option<&FetchError> {
        self.error.as_ref()
    }

    /// Enable the query. Returns a ticket when a request should be issued now:
    /// not when one is already in flight, and not when a result is already held.
    pub fn enable(&mut self) -> Option<QueryTicket> {
        self.enabled = true;
        if self.in_flight || self.data.is_some() || self.error.is_some() {
            return None;
        }
        Some(self.issue())
    }

    /// Disable the query, drop any held result and orphan the in-flight request.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.in_flight = false;
        self.data = None;
        self.error = None;
        self.generation += 1;
    }

    /// Record the outcome of `ticket`. Returns `false` if the result was stale
    /// and ignored.
    pub fn settle(&mut self, ticket: QueryTicket, result: Result<T, FetchError>) -> bool {
        if !self.enabled || !self.in_flight || ticket.generation != self.generation {
            return false;
        }
        self.in_flight = false;
        match result {
            Ok(data) => {
                self.data = Some(data);
                self.error = None;
            }
            Err(e) => {
                self.data = None;
                self.error = Some(e);
            }
        }
        true
    }

    #[must_use]
    pub fn snapshot(&self) -> QuerySnapshot<T> {
        QuerySnapshot {
            data: self.data.clone(),
            is_loading: self.is_loading(),
            error: self.error.clone(),
        }
    }

    fn issue(&mut self) -> QueryTicket {
        self.generation += 1;
        self.in_flight = true;
        self.data = None;
        self.error = None;
        QueryTicket {
            generation: self.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_query_never_issues() {
        let mut q = ProfileQuery::<u32>::new();
        assert!(!q.is_loading());
        assert!(!q.settle(QueryTicket { generation: 0 }, Ok(1)));
        assert_eq!(q.data(), None);
    }

    #[test]
    fn one_request_in_flight() {
        let mut q = ProfileQuery::<u32>::new();
        let ticket = q.enable().unwrap();
        assert!(q.is_loading());
        assert!(q.enable().is_none());

        assert!(q.settle(ticket, Ok(7)));
        assert_eq!(q.data(), Some(&7));
        assert!(!q.is_loading());
        assert!(q.enable().is_none());
    }

    #[test]
    fn disable_orphans_in_flight_request() {
        let mut q = ProfileQuery::<u32>::new();
        let old = q.enable().unwrap();
        q.disable();
        assert!(!q.settle(old, Ok(1)));
        assert_eq!(q.data(), None);

        let fresh = q.enable().unwrap();
        assert!(!q.settle(old, Ok(1)));
        assert!(q.settle(fresh, Ok(2)));
        assert_eq!(q.data(), Some(&2));
    }

    #[test]
    fn disable_drops_data() {
        let mut q = ProfileQuery::<u32>::new();
        let t = q.enable().unwrap();
        q.settle(t, Ok(3));
        q.disable();
        let snap = q.snapshot();
        assert_eq!(snap.data, None);
        assert!(!snap.is_loading);
    }

    #[test]
    fn error_is_held_and_not_retried() {
        let mut q = ProfileQuery::<u32>::new();
        let t = q.enable().unwrap();
        assert!(q.settle(t, Err(FetchError::Unauthorized)));
        assert_eq!(q.data(), None);
        assert_eq!(q.error(), Some(&FetchError::Unauthorized));
        assert!(q.enable().is_none());
    }

    #[test]
    fn login_response_uses_stated_lifetime() {
        let json = r#"{"token":"t","user":{"id":1,"name":"Ana","role":"admin","isActive":true},"expiresIn":60}"#;
        let response: StaffLoginResponse = serde_json::from_str(json).unwrap();
        let record = response.into_record(1_000, 5_000);
        assert_eq!(record.expires_at, 61_000);
    }

    #[test]
    fn login_response_falls_back_to_default_ttl() {
        let json = r#"{"token":"t","user":{"id":1,"name":"Ana","role":"admin","isActive":true}}"#;
        let response: StaffLoginResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.into_record(1_000, 5_000).expires_at, 6_000);
    }
}
