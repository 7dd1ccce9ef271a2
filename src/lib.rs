#![doc = include_str!("../README.md")]

#[cfg(feature = "http")]
pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod identity;
pub mod profile;
pub mod reconciler;
pub mod service;
pub mod session_store;
#[cfg(feature = "http")]
pub mod sso;
pub mod storage;
pub mod types;

// Re-exports for convenient access
#[cfg(feature = "http")]
pub use api::HttpProfileApi;
pub use config::SessionConfig;
pub use error::{Error, FetchError, Result};
pub use events::{SessionSignals, StaffSessionAction, StaffSessionSignal};
pub use guard::{GuardConfig, GuardDecision, RouteGuard};
pub use identity::{IdentityProvider, InteractionStatus, LogoutOptions, SsoAccount, TokenRequest};
pub use profile::{ProfileApi, ProfileQuery, QuerySnapshot, StaffCredentials, StaffLoginResponse};
pub use reconciler::{Reconciler, SessionPhase, SessionState, resolve_user_type};
pub use service::{SessionHandle, SessionService};
pub use session_store::{
    Clock, DEFAULT_STORAGE_KEY, LocalSessionStore, ManualClock, StaffSessionRecord, SystemClock,
};
#[cfg(feature = "http")]
pub use sso::{AuthorizationRequest, RedirectParams, SsoClient, SsoConfig};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage, StorageEvent};
pub use types::{
    CareerId, ObjectId, Role, SessionUser, StaffId, StaffProfile, StudentData, StudentProfile,
    UserType,
};
