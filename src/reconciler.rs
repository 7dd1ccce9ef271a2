//! The session state machine.
//!
//! [`Reconciler`] folds three independent signals (the identity provider's
//! status and accounts, the persisted staff record, and profile fetch results)
//! into one [`SessionState`]. It performs no I/O: callers gather an
//! [`Observation`], hand it to [`Reconciler::evaluate`], and execute the
//! [`FetchCommand`]s it returns.

use derive_more::Display;

use crate::error::FetchError;
use crate::identity::{InteractionStatus, SsoAccount};
use crate::profile::{ProfileQuery, QuerySnapshot, QueryTicket};
use crate::session_store::StaffSessionRecord;
use crate::types::{SessionUser, StaffProfile, StudentProfile, UserType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
pub enum SessionPhase {
    #[default]
    Uninitialized,
    Resolving,
    ResolvedNone,
    ResolvedStudent,
    ResolvedStaff,
}

impl SessionPhase {
    #[must_use]
    pub fn is_resolved(self) -> bool {
        matches!(
            self,
            Self::ResolvedNone | Self::ResolvedStudent | Self::ResolvedStaff
        )
    }
}

/// The authoritative session tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub user_type: UserType,
    pub is_authenticated: bool,
    pub user: Option<SessionUser>,
    pub is_loading: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Uninitialized,
            user_type: UserType::None,
            is_authenticated: false,
            user: None,
            is_loading: true,
        }
    }
}

/// Everything the reconciler looks at in one evaluation.
#[derive(Debug, Clone)]
pub struct Observation {
    pub status: InteractionStatus,
    /// Non-expired staff record, if any.
    pub staff: Option<StaffSessionRecord>,
    pub accounts: Vec<SsoAccount>,
}

/// A profile request the caller must issue and report back.
#[derive(Debug, Clone)]
pub enum FetchCommand {
    Student {
        ticket: QueryTicket,
        account: SsoAccount,
    },
    Staff {
        ticket: QueryTicket,
        record: StaffSessionRecord,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    Applied,
    /// The result belonged to a request that is no longer current.
    Stale,
    /// The API rejected the staff credential `token`; it must be removed from
    /// storage unless a different record has been written since.
    RevokeStaffSession { token: String },
}

/// Staff wins when both credentials are present.
#[must_use]
pub fn resolve_user_type(has_staff: bool, has_student: bool) -> UserType {
    match (has_staff, has_student) {
        (true, _) => UserType::Staff,
        (false, true) => UserType::Student,
        (false, false) => UserType::None,
    }
}

#[derive(Debug, Default)]
pub struct Reconciler {
    phase: SessionPhase,
    settled: bool,
    user_type: UserType,
    staff_record: Option<StaffSessionRecord>,
    student_account: Option<SsoAccount>,
    student_query: ProfileQuery<StudentProfile>,
    staff_query: ProfileQuery<StaffProfile>,
    is_authenticated: bool,
    user: Option<SessionUser>,
}

impl Reconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    #[must_use]
    pub fn user_type(&self) -> UserType {
        self.user_type
    }

    /// Whether an empty observation may be trusted yet.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// The settle delay has elapsed; empty observations now resolve to a guest.
    pub fn mark_settled(&mut self) {
        self.settled = true;
    }

    #[must_use]
    pub fn student_query(&self) -> QuerySnapshot<StudentProfile> {
        self.student_query.snapshot()
    }

    #[must_use]
    pub fn staff_query(&self) -> QuerySnapshot<StaffProfile> {
        self.staff_query.snapshot()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        let fetching = match self.phase {
            SessionPhase::ResolvedStudent => self.student_query.is_loading(),
            SessionPhase::ResolvedStaff => self.staff_query.is_loading(),
            _ => false,
        };
        SessionState {
            phase: self.phase,
            user_type: self.user_type,
            is_authenticated: self.is_authenticated,
            user: self.user.clone(),
            is_loading: !self.phase.is_resolved() || fetching,
        }
    }

    /// Re-evaluate against `observation`. Idempotent: the same observation
    /// twice in a row yields no commands and no change the second time.
    pub fn evaluate(&mut self, observation: Observation) -> Vec<FetchCommand> {
        let Observation {
            status,
            staff,
            accounts,
        } = observation;

        if status != InteractionStatus::None {
            if self.phase == SessionPhase::Uninitialized {
                self.phase = SessionPhase::Resolving;
            }
            return Vec::new();
        }

        let account = accounts.into_iter().next();
        if staff.is_none() && account.is_none() && !self.settled {
            if self.phase == SessionPhase::Uninitialized {
                self.phase = SessionPhase::Resolving;
            }
            return Vec::new();
        }

        match (
            resolve_user_type(staff.is_some(), account.is_some()),
            staff,
            account,
        ) {
            (UserType::Staff, Some(record), _) => self.observe_staff(record),
            (UserType::Student, _, Some(account)) => self.observe_student(account),
            _ => {
                if self.phase != SessionPhase::ResolvedNone {
                    self.enter(SessionPhase::ResolvedNone);
                }
                Vec::new()
            }
        }
    }

    fn observe_staff(&mut self, record: StaffSessionRecord) -> Vec<FetchCommand> {
        let unchanged = self.phase == SessionPhase::ResolvedStaff
            && self
                .staff_record
                .as_ref()
                .is_some_and(|current| current.token == record.token);
        if unchanged {
            return Vec::new();
        }

        self.enter(SessionPhase::ResolvedStaff);
        self.staff_record = Some(record.clone());
        self.staff_query
            .enable()
            .map(|ticket| FetchCommand::Staff { ticket, record })
            .into_iter()
            .collect()
    }

    fn observe_student(&mut self, account: SsoAccount) -> Vec<FetchCommand> {
        let unchanged = self.phase == SessionPhase::ResolvedStudent
            && self
                .student_account
                .as_ref()
                .is_some_and(|current| current.home_account_id == account.home_account_id);
        if unchanged {
            return Vec::new();
        }

        self.enter(SessionPhase::ResolvedStudent);
        self.student_account = Some(account.clone());
        self.student_query
            .enable()
            .map(|ticket| FetchCommand::Student { ticket, account })
            .into_iter()
            .collect()
    }

    /// Apply a student profile result.
    pub fn student_settled(
        &mut self,
        ticket: QueryTicket,
        result: Result<StudentProfile, FetchError>,
    ) -> SettleOutcome {
        if !self.student_query.settle(ticket, result) {
            return SettleOutcome::Stale;
        }
        let Some(account) = self.student_account.clone() else {
            return SettleOutcome::Stale;
        };

        match (
            self.student_query.data().cloned(),
            self.student_query.error().cloned(),
        ) {
            (Some(profile), _) => self.authenticate(SessionUser::Student(profile)),
            (None, Some(e)) if e.is_connectivity() => {
                tracing::warn!(error = %e, "Student profile unreachable; using SSO account");
                self.authenticate(SessionUser::Student(StudentProfile::from_account(&account)));
            }
            (None, Some(e)) => {
                tracing::warn!(error = %e, "Student profile rejected");
                self.deauthenticate();
            }
            (None, None) => {}
        }
        SettleOutcome::Applied
    }

    /// Apply a staff profile result.
    pub fn staff_settled(
        &mut self,
        ticket: QueryTicket,
        result: Result<StaffProfile, FetchError>,
    ) -> SettleOutcome {
        if !self.staff_query.settle(ticket, result) {
            return SettleOutcome::Stale;
        }
        let Some((cached, token)) = self
            .staff_record
            .as_ref()
            .map(|r| (r.user.clone(), r.token.clone()))
        else {
            return SettleOutcome::Stale;
        };

        match (
            self.staff_query.data().cloned(),
            self.staff_query.error().cloned(),
        ) {
            (Some(profile), _) if !profile.is_active => {
                tracing::warn!(staff_id = %profile.id, "Staff account is inactive");
                self.deauthenticate();
                SettleOutcome::RevokeStaffSession { token }
            }
            (Some(profile), _) => {
                self.authenticate(SessionUser::Staff(profile));
                SettleOutcome::Applied
            }
            (None, Some(e)) if e.is_connectivity() => {
                tracing::warn!(error = %e, "Staff profile unreachable; using cached snapshot");
                self.authenticate(SessionUser::Staff(cached));
                SettleOutcome::Applied
            }
            (None, Some(e)) if e.is_auth() => {
                tracing::warn!(error = %e, "Staff credential rejected");
                self.deauthenticate();
                SettleOutcome::RevokeStaffSession { token }
            }
            (None, Some(e)) => {
                tracing::warn!(error = %e, "Staff profile request failed");
                self.deauthenticate();
                SettleOutcome::Applied
            }
            (None, None) => SettleOutcome::Applied,
        }
    }

    /// Staff sign-out: forget everything and resolve again.
    pub fn logout_staff(&mut self) {
        self.enter(SessionPhase::Resolving);
    }

    /// Student sign-out: optimistic reset before the provider confirms.
    pub fn logout_student(&mut self) {
        self.enter(SessionPhase::Uninitialized);
    }

    fn enter(&mut self, phase: SessionPhase) {
        tracing::info!(from = %self.phase, to = %phase, "Session transition");
        self.student_query.disable();
        self.staff_query.disable();
        self.student_account = None;
        self.staff_record = None;
        self.is_authenticated = false;
        self.user = None;
        self.phase = phase;
        self.user_type = match phase {
            SessionPhase::ResolvedStudent => UserType::Student,
            SessionPhase::ResolvedStaff => UserType::Staff,
            _ => UserType::None,
        };
    }

    fn authenticate(&mut self, user: SessionUser) {
        tracing::info!(user_type = %self.user_type, name = %user.name(), "Session authenticated");
        self.is_authenticated = true;
        self.user = Some(user);
    }

    fn deauthenticate(&mut self) {
        self.is_authenticated = false;
        self.user = None;
    }
}
