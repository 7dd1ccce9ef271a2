#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use course_session::{
    Error, FetchError, IdentityProvider, InteractionStatus, LogoutOptions, ManualClock, ObjectId,
    ProfileApi, Role, SessionConfig, SessionHandle, SessionPhase, SessionService, SessionState,
    SsoAccount, StaffCredentials, StaffId, StaffLoginResponse, StaffProfile, StaffSessionRecord,
    StudentData, StudentProfile, TokenRequest,
};
use course_session::{CareerId, MemoryStorage};
use tokio::sync::watch;

pub const NOW: i64 = 1_750_000_000_000;
pub const API_LATENCY: Duration = Duration::from_millis(40);

pub fn account(oid: &str, name: Option<&str>) -> SsoAccount {
    SsoAccount {
        home_account_id: format!("{oid}.tecnm"),
        object_id: ObjectId(oid.into()),
        username: format!("{oid}@example.edu"),
        name: name.map(str::to_owned),
    }
}

pub fn staff(id: u64, name: &str) -> StaffProfile {
    StaffProfile {
        id: StaffId(id),
        name: name.into(),
        email: format!("{}@example.edu", name.to_lowercase()),
        role: Role::Admin,
        is_active: true,
    }
}

pub fn student(oid: &str, name: &str) -> StudentProfile {
    StudentProfile {
        object_id: ObjectId(oid.into()),
        name: name.into(),
        email: format!("{oid}@example.edu"),
        surnames: "Pérez López".into(),
        student_data: None,
    }
}

pub fn record(token: &str, user: StaffProfile, expires_at: i64) -> StaffSessionRecord {
    StaffSessionRecord::new(token, user, expires_at)
}

/// Identity provider double driven by the test.
pub struct FakeIdp {
    accounts: Mutex<Vec<SsoAccount>>,
    status: watch::Sender<InteractionStatus>,
    interactive_account: Mutex<Option<SsoAccount>>,
    token_error: Mutex<Option<Error>>,
    session: Mutex<Option<watch::Receiver<SessionState>>>,
    phase_at_logout: Mutex<Option<SessionPhase>>,
    pub token_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
}

impl FakeIdp {
    pub fn new(status: InteractionStatus) -> Self {
        let (status, _) = watch::channel(status);
        Self {
            accounts: Mutex::new(Vec::new()),
            status,
            interactive_account: Mutex::new(None),
            token_error: Mutex::new(None),
            session: Mutex::new(None),
            phase_at_logout: Mutex::new(None),
            token_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
        }
    }

    pub fn idle() -> Self {
        Self::new(InteractionStatus::None)
    }

    pub fn set_status(&self, status: InteractionStatus) {
        self.status.send_replace(status);
    }

    pub fn sign_in(&self, account: SsoAccount) {
        self.accounts.lock().unwrap().push(account);
    }

    /// Account the next interactive login will produce.
    pub fn on_interactive_login(&self, account: SsoAccount) {
        *self.interactive_account.lock().unwrap() = Some(account);
    }

    pub fn fail_tokens(&self, error: Error) {
        *self.token_error.lock().unwrap() = Some(error);
    }

    /// Watch the published session so `logout` can record what it saw.
    pub fn observe(&self, session: watch::Receiver<SessionState>) {
        *self.session.lock().unwrap() = Some(session);
    }

    /// Session phase published at the moment `logout` was called.
    pub fn phase_at_logout(&self) -> Option<SessionPhase> {
        *self.phase_at_logout.lock().unwrap()
    }
}

impl IdentityProvider for FakeIdp {
    fn accounts(&self) -> Vec<SsoAccount> {
        self.accounts.lock().unwrap().clone()
    }

    fn interaction_status(&self) -> InteractionStatus {
        *self.status.borrow()
    }

    fn subscribe_status(&self) -> watch::Receiver<InteractionStatus> {
        self.status.subscribe()
    }

    async fn acquire_token_silent(
        &self,
        _request: &TokenRequest,
        account: &SsoAccount,
    ) -> course_session::Result<String> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.token_error.lock().unwrap().take() {
            return Err(error);
        }
        Ok(format!("sso-token-{}", account.object_id))
    }

    async fn login_interactive(
        &self,
        _request: &TokenRequest,
    ) -> course_session::Result<SsoAccount> {
        let next = self.interactive_account.lock().unwrap().take();
        match next {
            Some(account) => {
                self.sign_in(account.clone());
                Ok(account)
            }
            None => Err(Error::InteractionRequired {
                url: "https://login.example.edu/authorize".into(),
            }),
        }
    }

    async fn logout(&self, _options: &LogoutOptions) -> course_session::Result<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        let phase = self
            .session
            .lock()
            .unwrap()
            .as_ref()
            .map(|rx| rx.borrow().phase);
        *self.phase_at_logout.lock().unwrap() = phase;
        self.set_status(InteractionStatus::Logout);
        self.accounts.lock().unwrap().clear();
        self.set_status(InteractionStatus::None);
        Ok(())
    }
}

/// Enrollment API double with a fixed latency.
pub struct FakeApi {
    student: Mutex<Result<StudentProfile, FetchError>>,
    student_data: Mutex<Result<Option<StudentData>, FetchError>>,
    staff: Mutex<Result<StaffProfile, FetchError>>,
    staff_by_token: Mutex<HashMap<String, Result<StaffProfile, FetchError>>>,
    login: Mutex<Result<StaffLoginResponse, FetchError>>,
    pub student_calls: AtomicUsize,
    pub staff_calls: AtomicUsize,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            student: Mutex::new(Ok(student("oid-1", "Luis"))),
            student_data: Mutex::new(Ok(Some(StudentData {
                control_number: "20240001".into(),
                phone: None,
                career_id: CareerId(3),
            }))),
            staff: Mutex::new(Ok(staff(1, "Ana"))),
            staff_by_token: Mutex::new(HashMap::new()),
            login: Mutex::new(Ok(StaffLoginResponse {
                token: "staff-token".into(),
                user: staff(1, "Ana"),
                expires_in: Some(3600),
            })),
            student_calls: AtomicUsize::new(0),
            staff_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_student(&self, result: Result<StudentProfile, FetchError>) {
        *self.student.lock().unwrap() = result;
    }

    pub fn set_student_data(&self, result: Result<Option<StudentData>, FetchError>) {
        *self.student_data.lock().unwrap() = result;
    }

    pub fn set_staff(&self, result: Result<StaffProfile, FetchError>) {
        *self.staff.lock().unwrap() = result;
    }

    /// Answer for one staff token, overriding `set_staff`.
    pub fn set_staff_for(&self, token: &str, result: Result<StaffProfile, FetchError>) {
        self.staff_by_token
            .lock()
            .unwrap()
            .insert(token.to_owned(), result);
    }

    pub fn set_login(&self, result: Result<StaffLoginResponse, FetchError>) {
        *self.login.lock().unwrap() = result;
    }

    pub fn student_calls(&self) -> usize {
        self.student_calls.load(Ordering::SeqCst)
    }

    pub fn staff_calls(&self) -> usize {
        self.staff_calls.load(Ordering::SeqCst)
    }
}

impl ProfileApi for FakeApi {
    async fn student_profile(&self, _token: &str) -> Result<StudentProfile, FetchError> {
        self.student_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(API_LATENCY).await;
        self.student.lock().unwrap().clone()
    }

    async fn student_data(
        &self,
        _token: &str,
        _object_id: &ObjectId,
    ) -> Result<Option<StudentData>, FetchError> {
        self.student_data.lock().unwrap().clone()
    }

    async fn staff_profile(&self, token: &str) -> Result<StaffProfile, FetchError> {
        self.staff_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(API_LATENCY).await;
        let by_token = self.staff_by_token.lock().unwrap().get(token).cloned();
        by_token.unwrap_or_else(|| self.staff.lock().unwrap().clone())
    }

    async fn staff_login(
        &self,
        _credentials: &StaffCredentials,
    ) -> Result<StaffLoginResponse, FetchError> {
        tokio::time::sleep(API_LATENCY).await;
        self.login.lock().unwrap().clone()
    }
}

pub struct Harness {
    pub storage: Arc<MemoryStorage>,
    pub idp: Arc<FakeIdp>,
    pub api: Arc<FakeApi>,
    pub clock: Arc<ManualClock>,
    pub handle: SessionHandle<FakeIdp, FakeApi>,
}

impl Harness {
    pub fn start(storage: Arc<MemoryStorage>, idp: FakeIdp, api: FakeApi) -> Self {
        let idp = Arc::new(idp);
        let api = Arc::new(api);
        let clock = Arc::new(ManualClock::new(NOW));
        let handle = SessionService::spawn(
            SessionConfig::new(),
            storage.clone(),
            Arc::clone(&idp),
            Arc::clone(&api),
            clock.clone(),
        );
        idp.observe(handle.subscribe());
        Self {
            storage,
            idp,
            api,
            clock,
            handle,
        }
    }

    /// A second session store on the same storage handle, as other code in the same tab would use.
    pub fn store(&self) -> course_session::LocalSessionStore {
        course_session::LocalSessionStore::new(
            self.storage.clone(),
            course_session::DEFAULT_STORAGE_KEY,
            self.clock.clone(),
        )
    }
}
