//! HTTP client for the enrollment API's profile endpoints.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{Error, FetchError};
use crate::profile::{ProfileApi, StaffCredentials, StaffLoginResponse};
use crate::types::{ObjectId, StaffProfile, StudentData, StudentProfile};

/// [`ProfileApi`] over HTTP with bearer authentication.
#[derive(Debug, Clone)]
pub struct HttpProfileApi {
    base_url: Url,
    http: reqwest::Client,
}

impl HttpProfileApi {
    #[must_use]
    pub fn new(mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    /// Create the client from `COURSE_API_BASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the variable is missing or not a URL.
    pub fn from_env() -> Result<Self, Error> {
        let raw = std::env::var("COURSE_API_BASE_URL")
            .map_err(|_| Error::Config("COURSE_API_BASE_URL is required".into()))?;
        let base_url = raw
            .parse::<Url>()
            .map_err(|e| Error::Config(format!("COURSE_API_BASE_URL: {e}")))?;
        Ok(Self::new(base_url))
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        self.base_url
            .join(path)
            .map_err(|e| FetchError::InvalidRequest(format!("{path}: {e}")))
    }

    /// `{base}/students/{oid}/data`, with the id encoded as a single path segment.
    fn student_data_url(&self, object_id: &ObjectId) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                FetchError::InvalidRequest(format!("{} cannot be a base", self.base_url))
            })?
            .pop_if_empty()
            .extend(["students", object_id.0.as_str(), "data"]);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, token: &str) -> Result<T, FetchError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;
        let response = ensure_success(response).await?;
        response.json::<T>().await.map_err(transport_error)
    }
}

impl ProfileApi for HttpProfileApi {
    async fn student_profile(&self, token: &str) -> Result<StudentProfile, FetchError> {
        self.get_json(self.endpoint("students/me")?, token).await
    }

    async fn student_data(
        &self,
        token: &str,
        object_id: &ObjectId,
    ) -> Result<Option<StudentData>, FetchError> {
        let url = self.student_data_url(object_id)?;
        match self.get_json::<StudentData>(url, token).await {
            Ok(data) => Ok(Some(data)),
            Err(FetchError::Status { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn staff_profile(&self, token: &str) -> Result<StaffProfile, FetchError> {
        self.get_json(self.endpoint("staff/me")?, token).await
    }

    async fn staff_login(
        &self,
        credentials: &StaffCredentials,
    ) -> Result<StaffLoginResponse, FetchError> {
        let response = self
            .http
            .post(self.endpoint("auth/staff/login")?)
            .json(credentials)
            .send()
            .await
            .map_err(transport_error)?;
        let response = ensure_success(response).await?;
        response
            .json::<StaffLoginResponse>()
            .await
            .map_err(transport_error)
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response.text().await.unwrap_or_default();
    tracing::debug!(status = status.as_u16(), "Profile API request failed");
    Err(classify_status(status, detail))
}

fn classify_status(status: StatusCode, detail: String) -> FetchError {
    match status {
        StatusCode::UNAUTHORIZED => FetchError::Unauthorized,
        StatusCode::FORBIDDEN => FetchError::Forbidden,
        _ => FetchError::Status {
            status: status.as_u16(),
            detail,
        },
    }
}

fn transport_error(e: reqwest::Error) -> FetchError {
    if e.is_decode() {
        FetchError::Decode(e.to_string())
    } else {
        FetchError::Network(e.to_string())
    }
}
