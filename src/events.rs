//! Change detection.
//!
//! Three producers feed one queue consumed by the session service: the storage
//! backend's cross-tab events, the same-tab [`SessionSignals`] bus raised on
//! staff sign-in/out, and the identity provider's status channel. A poll timer
//! inside the service covers anything those miss.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::error::{FetchError, Result};
use crate::identity::InteractionStatus;
use crate::profile::QueryTicket;
use crate::session_store::StaffSessionRecord;
use crate::storage::StorageEvent;
use crate::types::{StaffProfile, StudentProfile};

const SIGNAL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaffSessionAction {
    Login,
    Logout,
}

/// Same-tab notification that the staff session was written or removed.
///
/// Storage events are not delivered to the tab that made the write, so the
/// sign-in form raises this directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffSessionSignal {
    pub action: StaffSessionAction,
    pub session: Option<StaffSessionRecord>,
}

/// In-process broadcast bus for [`StaffSessionSignal`]s.
#[derive(Debug, Clone)]
pub struct SessionSignals {
    tx: broadcast::Sender<StaffSessionSignal>,
}

impl SessionSignals {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, signal: StaffSessionSignal) {
        tracing::debug!(action = ?signal.action, "Staff session signal");
        // No subscribers is fine: nothing is watching the session yet.
        let _ = self.tx.send(signal);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StaffSessionSignal> {
        self.tx.subscribe()
    }
}

impl Default for SessionSignals {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub(crate) enum SessionEvent {
    ProviderStatus(InteractionStatus),
    StorageChanged(StorageEvent),
    StaffSignal(StaffSessionSignal),
    /// Something changed that no producer reports (e.g. an interactive login finished).
    Refresh,
    StudentFetched {
        ticket: QueryTicket,
        result: std::result::Result<StudentProfile, FetchError>,
    },
    StaffFetched {
        ticket: QueryTicket,
        result: std::result::Result<StaffProfile, FetchError>,
    },
    LogoutStaff(oneshot::Sender<Result<()>>),
    LogoutStudent(oneshot::Sender<()>),
    Shutdown,
}

pub(crate) type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Forward storage events for `key` into the queue until either side closes.
pub(crate) fn forward_storage(
    mut rx: broadcast::Receiver<StorageEvent>,
    key: String,
    tx: EventSender,
) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) if event.key == key => {
                    if tx.send(SessionEvent::StorageChanged(event)).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Storage events lagged; forcing re-evaluation");
                    if tx.send(SessionEvent::Refresh).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

pub(crate) fn forward_signals(mut rx: broadcast::Receiver<StaffSessionSignal>, tx: EventSender) {
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(signal) => SessionEvent::StaffSignal(signal),
                Err(broadcast::error::RecvError::Lagged(_)) => SessionEvent::Refresh,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if tx.send(event).is_err() {
                break;
            }
        }
    });
}

pub(crate) fn forward_status(mut rx: watch::Receiver<InteractionStatus>, tx: EventSender) {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let status = *rx.borrow_and_update();
            if tx.send(SessionEvent::ProviderStatus(status)).is_err() {
                break;
            }
        }
    });
}
