//! Runtime driver for the [`Reconciler`].
//!
//! [`SessionService::spawn`] starts one task that owns the reconciler and is
//! the only writer of the published [`SessionState`]. Every trigger (provider
//! status, storage events, same-tab signals, the poll timer, the settle
//! timer, finished profile fetches, and logout requests) arrives on one queue
//! and is handled to completion before the next.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::SessionConfig;
use crate::error::{Error, FetchError, Result};
use crate::events::{
    self, EventSender, SessionEvent, SessionSignals, StaffSessionAction, StaffSessionSignal,
};
use crate::guard::{GuardDecision, RouteGuard};
use crate::identity::{IdentityProvider, InteractionStatus, LogoutOptions, SsoAccount, TokenRequest};
use crate::profile::{ProfileApi, StaffCredentials};
use crate::reconciler::{FetchCommand, Observation, Reconciler, SessionState, SettleOutcome};
use crate::session_store::{Clock, LocalSessionStore, StaffSessionRecord};
use crate::storage::KeyValueStorage;
use crate::types::{StaffProfile, StudentProfile};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub struct SessionService<I, A> {
    config: SessionConfig,
    store: LocalSessionStore,
    idp: Arc<I>,
    api: Arc<A>,
    signals: SessionSignals,
    reconciler: Reconciler,
    state_tx: watch::Sender<SessionState>,
    events_tx: EventSender,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    settle_deadline: Option<Instant>,
}

impl<I: IdentityProvider, A: ProfileApi> SessionService<I, A> {
    /// Start the session service on the current tokio runtime.
    #[must_use]
    pub fn spawn(
        config: SessionConfig,
        storage: Arc<dyn KeyValueStorage>,
        idp: Arc<I>,
        api: Arc<A>,
        clock: Arc<dyn Clock>,
    ) -> SessionHandle<I, A> {
        let store = LocalSessionStore::new(Arc::clone(&storage), config.storage_key.clone(), clock);
        let signals = SessionSignals::new();
        let (state_tx, state_rx) = watch::channel(SessionState::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        if let Some(rx) = storage.subscribe() {
            events::forward_storage(rx, config.storage_key.clone(), events_tx.clone());
        }
        events::forward_signals(signals.subscribe(), events_tx.clone());
        events::forward_status(idp.subscribe_status(), events_tx.clone());

        let service = Self {
            config: config.clone(),
            store: store.clone(),
            idp: Arc::clone(&idp),
            api: Arc::clone(&api),
            signals: signals.clone(),
            reconciler: Reconciler::new(),
            state_tx,
            events_tx: events_tx.clone(),
            events_rx,
            settle_deadline: None,
        };
        let task = tokio::spawn(service.run());

        SessionHandle {
            state_rx,
            events_tx,
            store,
            signals,
            idp,
            api,
            config,
            task: task.abort_handle(),
        }
    }

    async fn run(mut self) {
        let mut poll = tokio::time::interval(self.config.poll_interval.max(MIN_POLL_INTERVAL));
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(key = %self.store.key(), "Session service started");
        self.evaluate();

        loop {
            self.arm_settle();
            let deadline = self.settle_deadline;
            let settle = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = poll.tick() => self.evaluate(),
                () = settle => {
                    self.settle_deadline = None;
                    self.reconciler.mark_settled();
                    tracing::debug!("Settle delay elapsed");
                    self.evaluate();
                }
                event = self.events_rx.recv() => match event {
                    Some(SessionEvent::Shutdown) | None => break,
                    Some(event) => self.handle(event),
                },
            }
        }

        tracing::debug!("Session service stopped");
    }

    /// Start the settle timer the first time the provider is seen idle.
    fn arm_settle(&mut self) {
        if self.settle_deadline.is_none()
            && !self.reconciler.is_settled()
            && self.idp.interaction_status() == InteractionStatus::None
        {
            self.settle_deadline = Some(Instant::now() + self.config.settle_delay);
        }
    }

    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ProviderStatus(status) => {
                tracing::debug!(%status, "Identity provider status changed");
                self.evaluate();
            }
            SessionEvent::StorageChanged(change) => {
                tracing::debug!(key = %change.key, removed = change.new_value.is_none(), "Staff session changed in another tab");
                self.evaluate();
            }
            SessionEvent::StaffSignal(signal) => {
                tracing::debug!(action = ?signal.action, "Staff session changed in this tab");
                self.evaluate();
            }
            SessionEvent::Refresh => self.evaluate(),
            SessionEvent::StudentFetched { ticket, result } => {
                if self.reconciler.student_settled(ticket, result) == SettleOutcome::Stale {
                    tracing::debug!("Ignoring stale student profile");
                }
                self.publish();
            }
            SessionEvent::StaffFetched { ticket, result } => {
                match self.reconciler.staff_settled(ticket, result) {
                    SettleOutcome::Stale => tracing::debug!("Ignoring stale staff profile"),
                    SettleOutcome::RevokeStaffSession { token } => {
                        self.revoke_staff_session(&token);
                        self.evaluate();
                    }
                    SettleOutcome::Applied => {}
                }
                self.publish();
            }
            SessionEvent::LogoutStaff(reply) => {
                let result = self.store.clear();
                if let Err(e) = &result {
                    tracing::error!(error = %e, "Failed to clear staff session");
                }
                self.reconciler.logout_staff();
                self.publish();
                self.signals.emit(StaffSessionSignal {
                    action: StaffSessionAction::Logout,
                    session: None,
                });
                let _ = reply.send(result);
            }
            SessionEvent::LogoutStudent(reply) => {
                self.reconciler.logout_student();
                self.publish();
                let _ = reply.send(());
            }
            SessionEvent::Shutdown => {}
        }
    }

    /// Remove the stored record if it still carries the rejected `token`.
    fn revoke_staff_session(&mut self, token: &str) {
        if self.store.read().is_none_or(|record| record.token != token) {
            tracing::debug!("Staff session replaced or removed since the rejected request");
            return;
        }
        tracing::info!("Revoking staff session");
        if let Err(e) = self.store.clear() {
            tracing::error!(error = %e, "Failed to clear revoked staff session");
        }
        self.signals.emit(StaffSessionSignal {
            action: StaffSessionAction::Logout,
            session: None,
        });
    }

    fn evaluate(&mut self) {
        let observation = Observation {
            status: self.idp.interaction_status(),
            staff: self.store.read_valid(),
            accounts: self.idp.accounts(),
        };
        for command in self.reconciler.evaluate(observation) {
            self.dispatch(command);
        }
        self.publish();
    }

    fn dispatch(&self, command: FetchCommand) {
        let tx = self.events_tx.clone();
        match command {
            FetchCommand::Student { ticket, account } => {
                let idp = Arc::clone(&self.idp);
                let api = Arc::clone(&self.api);
                let request = self.config.token_request();
                tokio::spawn(async move {
                    let result = fetch_student(&*idp, &*api, &request, &account).await;
                    let _ = tx.send(SessionEvent::StudentFetched { ticket, result });
                });
            }
            FetchCommand::Staff { ticket, record } => {
                let api = Arc::clone(&self.api);
                tokio::spawn(async move {
                    let result = fetch_staff(&*api, &record).await;
                    let _ = tx.send(SessionEvent::StaffFetched { ticket, result });
                });
            }
        }
    }

    fn publish(&self) {
        let next = self.reconciler.state();
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

async fn fetch_student<I: IdentityProvider, A: ProfileApi>(
    idp: &I,
    api: &A,
    request: &TokenRequest,
    account: &SsoAccount,
) -> std::result::Result<StudentProfile, FetchError> {
    let token = idp
        .acquire_token_silent(request, account)
        .await
        .map_err(FetchError::from)?;
    let mut profile = api.student_profile(&token).await?;
    match api.student_data(&token, &profile.object_id).await {
        Ok(data) => profile.student_data = data,
        Err(e) => {
            tracing::warn!(error = %e, object_id = %profile.object_id, "Student data unavailable");
        }
    }
    Ok(profile)
}

async fn fetch_staff<A: ProfileApi>(
    api: &A,
    record: &StaffSessionRecord,
) -> std::result::Result<StaffProfile, FetchError> {
    api.staff_profile(&record.token).await
}

/// Reader and command side of a running [`SessionService`].
pub struct SessionHandle<I, A> {
    state_rx: watch::Receiver<SessionState>,
    events_tx: EventSender,
    store: LocalSessionStore,
    signals: SessionSignals,
    idp: Arc<I>,
    api: Arc<A>,
    config: SessionConfig,
    task: AbortHandle,
}

// Manual Clone: avoid derive adding `I: Clone, A: Clone` bounds.
impl<I, A> Clone for SessionHandle<I, A> {
    fn clone(&self) -> Self {
        Self {
            state_rx: self.state_rx.clone(),
            events_tx: self.events_tx.clone(),
            store: self.store.clone(),
            signals: self.signals.clone(),
            idp: Arc::clone(&self.idp),
            api: Arc::clone(&self.api),
            config: self.config.clone(),
            task: self.task.clone(),
        }
    }
}

impl<I: IdentityProvider, A: ProfileApi> SessionHandle<I, A> {
    /// Current session tuple.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Receiver that is notified whenever the session tuple changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Wait until the session tuple satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceStopped`] if the service ends first.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SessionState) -> bool,
    ) -> Result<SessionState> {
        let mut rx = self.state_rx.clone();
        let state = rx
            .wait_for(predicate)
            .await
            .map_err(|_| Error::ServiceStopped)?;
        Ok(state.clone())
    }

    /// Same-tab staff session signals, for views that react to sign-in/out.
    #[must_use]
    pub fn signals(&self) -> &SessionSignals {
        &self.signals
    }

    #[must_use]
    pub fn guard(&self, guard: RouteGuard) -> GuardDecision {
        guard.decide(
            &self.state_rx.borrow(),
            self.idp.interaction_status(),
            &self.config.guard,
        )
    }

    /// Exchange staff credentials, persist the session and announce it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fetch`] if the API rejects the credentials or is
    /// unreachable, or a storage error if the session cannot be written.
    pub async fn staff_login(&self, email: &str, password: &str) -> Result<StaffSessionRecord> {
        let credentials = StaffCredentials::new(email, password);
        let response = self.api.staff_login(&credentials).await.map_err(|e| {
            tracing::warn!(error = %e, "Staff login failed");
            Error::Fetch(e)
        })?;

        let ttl_ms = i64::try_from(self.config.staff_session_ttl.as_millis()).unwrap_or(i64::MAX);
        let record = response.into_record(self.store.clock().now_millis(), ttl_ms);
        self.store.write(&record)?;
        tracing::info!(staff_id = %record.user.id, role = %record.user.role, "Staff login successful");

        self.signals.emit(StaffSessionSignal {
            action: StaffSessionAction::Login,
            session: Some(record.clone()),
        });
        Ok(record)
    }

    /// Clear the staff session and resolve again.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the record could not be removed, or
    /// [`Error::ServiceStopped`].
    pub async fn staff_logout(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.events_tx
            .send(SessionEvent::LogoutStaff(reply))
            .map_err(|_| Error::ServiceStopped)?;
        done.await.map_err(|_| Error::ServiceStopped)?
    }

    /// Interactive SSO sign-in.
    ///
    /// # Errors
    ///
    /// Failures from the identity provider are returned unchanged; the session
    /// state is left as it was.
    pub async fn student_login(&self) -> Result<SsoAccount> {
        let account = self
            .idp
            .login_interactive(&self.config.token_request())
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "Interactive login failed"))?;
        tracing::info!(username = %account.username, "Interactive login successful");
        let _ = self.events_tx.send(SessionEvent::Refresh);
        Ok(account)
    }

    /// SSO sign-out. Local state is reset before the provider is called.
    ///
    /// # Errors
    ///
    /// Failures from the identity provider are returned after the local reset.
    pub async fn student_logout(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.events_tx
            .send(SessionEvent::LogoutStudent(reply))
            .map_err(|_| Error::ServiceStopped)?;
        done.await.map_err(|_| Error::ServiceStopped)?;

        let options = LogoutOptions {
            account: self.idp.accounts().into_iter().next(),
            post_logout_redirect_uri: Some(self.config.guard.landing_route.clone()),
        };
        self.idp
            .logout(&options)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "SSO logout failed"))
    }

    /// Stop the service task. Readers keep the last published state.
    pub fn shutdown(&self) {
        if self.events_tx.send(SessionEvent::Shutdown).is_err() {
            self.task.abort();
        }
    }
}
