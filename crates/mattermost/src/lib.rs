pub mod models;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ci_relay_core::config::MattermostConfig;
use reqwest::{Client, RequestBuilder, Response};
pub use reqwest::StatusCode;
use serde::{Deserialize, de::DeserializeOwned};

use crate::models::{Channel, Post, User};

#[derive(Debug, thiserror::Error)]
pub enum HostApiError {
    #[error("request to Mattermost failed")]
    Request(#[from] reqwest::Error),
    #[error("Mattermost responded with {status}: {message}")]
    Status { status: StatusCode, message: String },
}

/// Chat platform operations used by the bot.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<User, HostApiError>;

    async fn get_channel(&self, channel_id: &str) -> Result<Channel, HostApiError>;

    async fn get_post(&self, post_id: &str) -> Result<Post, HostApiError>;

    async fn update_post(&self, post: &Post) -> Result<Post, HostApiError>;

    async fn create_post(&self, post: &Post) -> Result<Post, HostApiError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Mattermost REST (v4) client authenticated as the bot account.
#[derive(Clone)]
pub struct Mattermost {
    client: Client,
    api_url: String,
    token: String,
}

impl Mattermost {
    pub fn new(config: &MattermostConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("ci-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create Mattermost client")?;
        Ok(Self {
            client,
            api_url: format!("{}/api/v4", config.url.trim_end_matches('/')),
            token: config.bot_token.clone(),
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.token)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, HostApiError> {
        let builder = self.client.get(format!("{}{}", self.api_url, path));
        let response = self.authorized(builder).send().await?;
        Ok(check(response).await?.json().await?)
    }
}

async fn check(response: Response) -> Result<Response, HostApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body).map(|e| e.message).unwrap_or(body);
    Err(HostApiError::Status { status, message })
}

#[async_trait]
impl ChatClient for Mattermost {
    async fn get_user(&self, user_id: &str) -> Result<User, HostApiError> {
        self.get(&format!("/users/{user_id}")).await
    }

    async fn get_channel(&self, channel_id: &str) -> Result<Channel, HostApiError> {
        self.get(&format!("/channels/{channel_id}")).await
    }

    async fn get_post(&self, post_id: &str) -> Result<Post, HostApiError> {
        self.get(&format!("/posts/{post_id}")).await
    }

    async fn update_post(&self, post: &Post) -> Result<Post, HostApiError> {
        let builder = self.client.put(format!("{}/posts/{}", self.api_url, post.id)).json(post);
        let response = self.authorized(builder).send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn create_post(&self, post: &Post) -> Result<Post, HostApiError> {
        let builder = self.client.post(format!("{}/posts", self.api_url)).json(post);
        let response = self.authorized(builder).send().await?;
        let created: Post = check(response).await?.json().await?;
        tracing::debug!(post_id = %created.id, channel_id = %created.channel_id, "Created post");
        Ok(created)
    }
}
