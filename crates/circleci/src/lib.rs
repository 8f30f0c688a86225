pub mod webhook;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ci_relay_core::config::CircleCiConfig;
use reqwest::{Client, RequestBuilder, Response};
pub use reqwest::StatusCode;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

#[derive(Debug, thiserror::Error)]
pub enum ExternalApiError {
    #[error("request to CircleCI failed")]
    Request(#[from] reqwest::Error),
    #[error("CircleCI responded with {status}: {message}")]
    Status { status: StatusCode, message: String },
}

/// One job of a workflow run.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorkflowJob {
    pub id: Option<String>,
    pub name: String,
    pub status: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub job_number: Option<u64>,
    #[serde(default)]
    pub approval_request_id: Option<String>,
}

impl WorkflowJob {
    /// The approval request this job is waiting on, if it is an approval gate.
    pub fn approval_request_id(&self) -> Option<&str> {
        self.approval_request_id.as_deref().filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
pub struct CircleCiUser {
    pub id: String,
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// The CircleCI operations the bot needs. Every call runs with the acting user's token.
#[async_trait]
pub trait CiClient: Send + Sync {
    async fn current_user(&self, token: &str) -> Result<CircleCiUser, ExternalApiError>;

    async fn workflow_jobs(
        &self,
        token: &str,
        workflow_id: &str,
    ) -> Result<Vec<WorkflowJob>, ExternalApiError>;

    async fn approve_job(
        &self,
        token: &str,
        workflow_id: &str,
        approval_request_id: &str,
    ) -> Result<(), ExternalApiError>;
}

#[derive(Deserialize)]
struct Page<T> {
    items: Vec<T>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// CircleCI v2 REST client.
#[derive(Clone)]
pub struct CircleCi {
    client: Client,
    api_url: String,
}

impl CircleCi {
    pub fn new(config: &CircleCiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("ci-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create CircleCI client")?;
        Ok(Self { client, api_url: config.api_url.trim_end_matches('/').to_string() })
    }

    fn request(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder.header("Circle-Token", token).header(reqwest::header::ACCEPT, "application/json")
    }

    async fn get<T: DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ExternalApiError> {
        let builder = self.client.get(format!("{}{}", self.api_url, path)).query(query);
        let response = self.request(builder, token).send().await?;
        Ok(check(response).await?.json().await?)
    }
}

async fn check(response: Response) -> Result<Response, ExternalApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body).map(|e| e.message).unwrap_or(body);
    Err(ExternalApiError::Status { status, message })
}

#[async_trait]
impl CiClient for CircleCi {
    async fn current_user(&self, token: &str) -> Result<CircleCiUser, ExternalApiError> {
        self.get(token, "/me", &[]).await
    }

    async fn workflow_jobs(
        &self,
        token: &str,
        workflow_id: &str,
    ) -> Result<Vec<WorkflowJob>, ExternalApiError> {
        let path = format!("/workflow/{workflow_id}/job");
        let mut page: Page<WorkflowJob> = self.get(token, &path, &[]).await?;
        let mut jobs = std::mem::take(&mut page.items);
        while let Some(page_token) = page.next_page_token.take() {
            page = self.get(token, &path, &[("page-token", page_token.as_str())]).await?;
            if page.items.is_empty() {
                break;
            }
            jobs.append(&mut page.items);
        }
        tracing::debug!(workflow_id, jobs = jobs.len(), "Fetched workflow jobs");
        Ok(jobs)
    }

    async fn approve_job(
        &self,
        token: &str,
        workflow_id: &str,
        approval_request_id: &str,
    ) -> Result<(), ExternalApiError> {
        let url = format!("{}/workflow/{workflow_id}/approve/{approval_request_id}", self.api_url);
        let response = self.request(self.client.post(url), token).send().await?;
        check(response).await?;
        tracing::info!(workflow_id, approval_request_id, "Approved workflow job");
        Ok(())
    }
}
