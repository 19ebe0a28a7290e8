//! Domain API callers
//!
//! Thin typed wrappers over `Orchestrator::send` for the endpoints the
//! command line uses. Every call goes through the session pipeline, so
//! expiry handling and replay are inherited; token endpoints are flagged
//! `skip_refresh` by `ApiRequest` itself.

use std::time::Duration;

use common::Secret;
use orchestrator::{Orchestrator, PollHandle, Result};
use serde::Deserialize;
use serde_json::json;
use session::Credential;
use transport::{ApiRequest, FilePart};

/// Access/refresh pair issued by the token endpoint.
#[derive(Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl From<TokenPair> for Credential {
    fn from(pair: TokenPair) -> Self {
        Credential::new(pair.access, Some(pair.refresh))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub subscription_tier: String,
    pub credits_remaining: i64,
}

/// The logged-in account.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub date_joined: String,
    #[serde(default)]
    pub is_staff: bool,
    pub profile: Option<Profile>,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: Secret<String>,
}

/// Editable account fields; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Resume {
    pub id: i64,
    pub original_filename: String,
    pub file_size: u64,
    pub mime_type: String,
    pub uploaded_at: String,
    pub is_paid: bool,
    pub download_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl AnalysisStatus {
    /// `Done` and `Failed` end polling.
    pub fn is_terminal(self) -> bool {
        matches!(self, AnalysisStatus::Done | AnalysisStatus::Failed)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Analysis {
    pub id: String,
    pub status: AnalysisStatus,
    pub match_score: Option<u8>,
    pub hire_probability: Option<f64>,
    #[serde(default)]
    pub ats_flags: Vec<serde_json::Value>,
    #[serde(default)]
    pub rewritten_bullets: Vec<serde_json::Value>,
    #[serde(default)]
    pub cover_letter: String,
    pub created_at: String,
    pub completed_at: Option<String>,
}

/// Input for a new analysis run.
#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub resume_id: i64,
    pub job_description: String,
    pub job_title: String,
    pub company: String,
}

#[derive(Deserialize)]
struct Checkout {
    checkout_url: String,
}

pub struct AuthApi {
    client: Orchestrator,
}

impl AuthApi {
    pub fn new(client: Orchestrator) -> Self {
        Self { client }
    }

    /// Exchange email and password for a token pair and store it.
    pub async fn login(&self, email: &str, password: &Secret<String>) -> Result<()> {
        let pair: TokenPair = self
            .client
            .send_json(ApiRequest::post(
                "/auth/token/",
                json!({ "email": email, "password": password.expose() }),
            ))
            .await?;
        self.client.login(&pair.into());
        Ok(())
    }

    pub async fn me(&self) -> Result<User> {
        self.client.send_json(ApiRequest::get("/auth/me/")).await
    }

    /// Change name fields of the logged-in account.
    pub async fn update_me(&self, update: &ProfileUpdate) -> Result<User> {
        let mut body = serde_json::Map::new();
        if let Some(first_name) = &update.first_name {
            body.insert("first_name".into(), json!(first_name));
        }
        if let Some(last_name) = &update.last_name {
            body.insert("last_name".into(), json!(last_name));
        }
        self.client
            .send_json(ApiRequest::patch("/auth/me/", body.into()))
            .await
    }

    /// Create an account. Does not log in.
    pub async fn register(&self, registration: &Registration) -> Result<()> {
        let password = registration.password.expose();
        self.client
            .send(ApiRequest::post(
                "/auth/register/",
                json!({
                    "email": registration.email,
                    "first_name": registration.first_name,
                    "last_name": registration.last_name,
                    "password": password,
                    "password_confirm": password,
                }),
            ))
            .await?;
        Ok(())
    }

    pub fn logout(&self) {
        self.client.logout();
    }
}

pub struct ResumeApi {
    client: Orchestrator,
}

impl ResumeApi {
    pub fn new(client: Orchestrator) -> Self {
        Self { client }
    }

    pub async fn list(&self) -> Result<Vec<Resume>> {
        self.client.send_json(ApiRequest::get("/resumes/")).await
    }

    /// Upload a resume file as the `file` field of a multipart form.
    pub async fn upload(&self, file_name: &str, mime: &str, content: Vec<u8>) -> Result<Resume> {
        self.client
            .send_json(ApiRequest::upload(
                "/resumes/",
                vec![FilePart {
                    field: "file".into(),
                    file_name: file_name.to_owned(),
                    mime: mime.to_owned(),
                    content: content.into(),
                }],
            ))
            .await
    }

    pub async fn get(&self, id: i64) -> Result<Resume> {
        self.client
            .send_json(ApiRequest::get(format!("/resumes/{id}/")))
            .await
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        self.client
            .send(ApiRequest::delete(format!("/resumes/{id}/")))
            .await?;
        Ok(())
    }
}

pub struct AnalysisApi {
    client: Orchestrator,
}

impl AnalysisApi {
    pub fn new(client: Orchestrator) -> Self {
        Self { client }
    }

    pub async fn create(&self, analysis: &NewAnalysis) -> Result<Analysis> {
        self.client
            .send_json(ApiRequest::post(
                "/analysis/",
                json!({
                    "resume_id": analysis.resume_id,
                    "job_description": analysis.job_description,
                    "job_title": analysis.job_title,
                    "company": analysis.company,
                }),
            ))
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Analysis> {
        fetch_analysis(&self.client, id).await
    }

    /// Poll `id` until the analysis is done or failed.
    pub fn wait_for(
        &self,
        id: &str,
        interval: Duration,
        max_attempts: u32,
    ) -> PollHandle<Analysis> {
        let client = self.client.clone();
        self.client.poll(
            id,
            move |id: String| {
                let client = client.clone();
                async move { fetch_analysis(&client, &id).await }
            },
            |analysis: &Analysis| analysis.status.is_terminal(),
            interval,
            max_attempts,
        )
    }
}

async fn fetch_analysis(client: &Orchestrator, id: &str) -> Result<Analysis> {
    client
        .send_json(ApiRequest::get(format!("/analysis/{id}/")))
        .await
}

pub struct PaymentApi {
    client: Orchestrator,
}

impl PaymentApi {
    pub fn new(client: Orchestrator) -> Self {
        Self { client }
    }

    /// Start a checkout for `resume_id` and return the payment page URL.
    pub async fn create_checkout(&self, resume_id: i64) -> Result<String> {
        let checkout: Checkout = self
            .client
            .send_json(ApiRequest::post(
                "/payments/checkout/",
                json!({ "resume_id": resume_id }),
            ))
            .await?;
        Ok(checkout.checkout_url)
    }
}
