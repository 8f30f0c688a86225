use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub db: DbConfig,
    pub mattermost: MattermostConfig,
    #[serde(default)]
    pub circleci: CircleCiConfig,
    pub installation: InstallationConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub port: u16,
    /// Externally reachable base URL, used for interactive action callbacks.
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DbConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MattermostConfig {
    pub url: String,
    pub bot_token: String,
    pub bot_user_id: String,
    /// Token Mattermost sends with every invocation of the slash command.
    pub command_token: String,
    #[serde(default = "default_command_trigger")]
    pub command_trigger: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircleCiConfig {
    #[serde(default = "default_circleci_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CircleCiConfig {
    fn default() -> Self {
        Self { api_url: default_circleci_api_url(), timeout_secs: default_timeout_secs() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstallationConfig {
    /// Key of the subscription document for this installation.
    #[serde(default = "default_installation_id")]
    pub id: String,
    /// Base64-encoded 32-byte key used to encrypt stored CI tokens.
    pub encryption_key: String,
    /// Secret used to sign the context of interactive actions.
    pub signing_secret: String,
    #[serde(default = "default_store_attempts")]
    pub store_attempts: u32,
}

fn default_command_trigger() -> String { "circleci".to_string() }

fn default_circleci_api_url() -> String { "https://circleci.com/api/v2".to_string() }

fn default_timeout_secs() -> u64 { 30 }

fn default_installation_id() -> String { "default".to_string() }

fn default_store_attempts() -> u32 { 5 }
