//! Mattermost wire types: posts with message attachments, slash commands and
//! interactive actions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const ATTACHMENTS_PROP: &str = "attachments";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub root_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub props: Map<String, Value>,
}

impl Post {
    pub fn new(channel_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self { channel_id: channel_id.into(), message: message.into(), ..Default::default() }
    }

    /// Reply threaded under `root_id`.
    pub fn reply(
        channel_id: impl Into<String>,
        root_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self { root_id: root_id.into(), ..Self::new(channel_id, message) }
    }

    pub fn attachments(&self) -> Result<Vec<Attachment>, serde_json::Error> {
        match self.props.get(ATTACHMENTS_PROP) {
            Some(value) => Vec::<Attachment>::deserialize(value),
            None => Ok(Vec::new()),
        }
    }

    pub fn set_attachments(&mut self, attachments: &[Attachment]) -> Result<(), serde_json::Error> {
        if attachments.is_empty() {
            self.props.remove(ATTACHMENTS_PROP);
        } else {
            self.props.insert(ATTACHMENTS_PROP.to_string(), serde_json::to_value(attachments)?);
        }
        Ok(())
    }

    pub fn with_attachments(mut self, attachments: &[Attachment]) -> Result<Self, serde_json::Error> {
        self.set_attachments(attachments)?;
        Ok(self)
    }
}

/// Slack-style message attachment. Unknown keys are preserved on round trips so that
/// editing a post never drops fields this crate does not model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fallback: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub color: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pretext: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title_link: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<AttachmentField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<PostAction>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachmentField {
    pub title: String,
    pub value: String,
    #[serde(default)]
    pub short: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostAction {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration: Option<PostActionIntegration>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostActionIntegration {
    pub url: String,
    #[serde(default)]
    pub context: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
}

/// Slash command invocation, as posted (form-encoded) by the chat server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CommandArgs {
    pub channel_id: String,
    pub user_id: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub text: String,
    /// Verification token of the slash command.
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Ephemeral,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResponse {
    pub response_type: ResponseType,
    pub text: String,
}

impl CommandResponse {
    pub fn ephemeral(text: impl Into<String>) -> Self {
        Self { response_type: ResponseType::Ephemeral, text: text.into() }
    }
}

/// Request posted when a user clicks an interactive action.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PostActionRequest {
    pub user_id: String,
    pub post_id: String,
    pub channel_id: String,
    #[serde(default)]
    pub context: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PostActionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ephemeral_text: Option<String>,
}

impl PostActionResponse {
    pub fn ephemeral(text: impl Into<String>) -> Self { Self { ephemeral_text: Some(text.into()) } }
}
