pub mod approval;
pub mod command;
pub mod router;
pub mod signing;
#[cfg(test)]
mod test_utils;

use std::sync::Arc;

use ci_relay_circleci::CiClient;
use ci_relay_core::{
    config::Config,
    store::{SubscriptionStore, TokenStore},
};
use ci_relay_mattermost::{ChatClient, models::Post};

use crate::signing::ContextSigner;

pub const UNKNOWN_USER: &str = "Unknown user";

/// Settings derived from the config that handlers need at runtime.
#[derive(Debug, Clone)]
pub struct BotSettings {
    pub command_trigger: String,
    pub bot_user_id: String,
    /// Callback URL for the approve action.
    pub approve_url: String,
    /// URL CI jobs post their notifications to.
    pub webhook_url: String,
    pub store_attempts: u32,
    /// Expected verification token of the slash command.
    pub command_token: String,
    pub signer: ContextSigner,
}

impl BotSettings {
    pub fn from_config(config: &Config) -> Self {
        let public_url = config.server.public_url.trim_end_matches('/');
        Self {
            command_trigger: config.mattermost.command_trigger.clone(),
            bot_user_id: config.mattermost.bot_user_id.clone(),
            approve_url: format!("{public_url}/api/actions/approve"),
            webhook_url: format!("{public_url}/api/webhook"),
            store_attempts: config.installation.store_attempts,
            command_token: config.mattermost.command_token.clone(),
            signer: ContextSigner::new(&config.installation.signing_secret),
        }
    }
}

/// Shared context available to every handler.
#[derive(Clone)]
pub struct BotContext {
    pub settings: Arc<BotSettings>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub ci: Arc<dyn CiClient>,
    pub chat: Arc<dyn ChatClient>,
}

impl BotContext {
    /// `@username` of a user, `None` if the lookup fails.
    pub async fn username(&self, user_id: &str) -> Option<String> {
        match self.chat.get_user(user_id).await {
            Ok(user) => Some(format!("@{}", user.username)),
            Err(e) => {
                tracing::warn!(user_id, "Unable to get user: {e}");
                None
            }
        }
    }

    /// `@username` of a user, or a placeholder if the lookup fails.
    pub async fn user_label(&self, user_id: &str) -> String {
        self.username(user_id).await.unwrap_or_else(|| UNKNOWN_USER.to_string())
    }

    /// Post as the bot. Failures are logged, never propagated.
    pub async fn post_as_bot(&self, mut post: Post) -> bool {
        post.user_id = self.settings.bot_user_id.clone();
        match self.chat.create_post(&post).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(channel_id = %post.channel_id, "Unable to create post: {e}");
                false
            }
        }
    }
}
