use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::identity::SsoAccount;

/// Which identity path the current visitor is on. Mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    #[default]
    #[display("none")]
    None,
    #[display("student")]
    Student,
    #[display("staff")]
    Staff,
}

/// Numeric staff identifier assigned by the enrollment API.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct StaffId(pub u64);

/// Opaque object id of an SSO account (the provider's `oid` claim).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct ObjectId(pub String);

/// Career (degree program) identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct CareerId(pub u64);

/// Staff role.
///
/// The API has historically sent roles as a bare string, a numeric code, or an
/// object (`{"name": "admin"}` / `{"id": 1}`). All of those are decoded here,
/// once, and anything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(try_from = "RawRole", into = "String")]
pub enum Role {
    #[display("admin")]
    Admin,
    #[display("teacher")]
    Teacher,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Teacher => "teacher",
        }
    }

    fn from_code(code: i64) -> Result<Self, Error> {
        match code {
            1 => Ok(Self::Admin),
            2 => Ok(Self::Teacher),
            other => Err(Error::Decode(format!("unknown role code: {other}"))),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "teacher" => Ok(Self::Teacher),
            other => Err(Error::Decode(format!("unknown role: {other:?}"))),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_owned()
    }
}

/// Every shape a role has been observed in on the wire.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawRole {
    Name(String),
    Code(i64),
    Object {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        id: Option<i64>,
    },
}

impl TryFrom<RawRole> for Role {
    type Error = Error;

    fn try_from(raw: RawRole) -> Result<Self, Self::Error> {
        match raw {
            RawRole::Name(name) => name.parse(),
            RawRole::Code(code) => Self::from_code(code),
            RawRole::Object {
                name: Some(name), ..
            } => name.parse(),
            RawRole::Object { id: Some(id), .. } => Self::from_code(id),
            RawRole::Object { .. } => Err(Error::Decode("role object without name or id".into())),
        }
    }
}

/// Staff member as returned by the staff profile endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffProfile {
    pub id: StaffId,
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub role: Role,
    pub is_active: bool,
}

/// Enrollment data attached to a student after the second profile call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentData {
    pub control_number: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub career_id: CareerId,
}

/// Student as returned by the student profile endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    #[serde(alias = "oid")]
    pub object_id: ObjectId,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub surnames: String,
    #[serde(default)]
    pub student_data: Option<StudentData>,
}

impl StudentProfile {
    /// Best-effort profile built from the SSO account alone.
    #[must_use]
    pub fn from_account(account: &SsoAccount) -> Self {
        Self {
            object_id: account.object_id.clone(),
            name: account.display_name().to_owned(),
            email: account.username.clone(),
            surnames: String::new(),
            student_data: None,
        }
    }
}

/// The resolved user behind a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SessionUser {
    Student(StudentProfile),
    Staff(StaffProfile),
}

impl SessionUser {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Student(p) => &p.name,
            Self::Staff(p) => &p.name,
        }
    }

    #[must_use]
    pub fn user_type(&self) -> UserType {
        match self {
            Self::Student(_) => UserType::Student,
            Self::Staff(_) => UserType::Staff,
        }
    }
}
