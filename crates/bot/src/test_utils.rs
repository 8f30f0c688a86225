use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use ci_relay_circleci::{CiClient, CircleCiUser, ExternalApiError, WorkflowJob};
use ci_relay_core::models::{CiEvent, EventStatus, ProjectIdentifier};
use ci_relay_db::memory::{MemorySubscriptionStore, MemoryTokenStore};
use ci_relay_mattermost::{
    ChatClient, HostApiError, StatusCode,
    models::{Channel, Post, User},
};

use crate::{BotContext, BotSettings, signing::ContextSigner};

pub const COMMAND_TOKEN: &str = "cmd-token";

fn host_not_found(what: &str) -> HostApiError {
    HostApiError::Status { status: StatusCode::NOT_FOUND, message: format!("{what} not found") }
}

#[derive(Default)]
pub struct FakeChat {
    users: Mutex<HashMap<String, User>>,
    channels: Mutex<HashMap<String, Channel>>,
    posts: Mutex<HashMap<String, Post>>,
    created: Mutex<Vec<Post>>,
    updated: Mutex<Vec<Post>>,
    next_id: AtomicUsize,
    failing_channels: Mutex<HashSet<String>>,
}

impl FakeChat {
    pub fn add_user(&self, id: &str, username: &str) {
        let user = User { id: id.to_string(), username: username.to_string() };
        self.users.lock().unwrap().insert(id.to_string(), user);
    }

    pub fn add_channel(&self, id: &str, name: &str) {
        let channel =
            Channel { id: id.to_string(), name: name.to_string(), display_name: name.to_string() };
        self.channels.lock().unwrap().insert(id.to_string(), channel);
    }

    pub fn add_post(&self, post: Post) { self.posts.lock().unwrap().insert(post.id.clone(), post); }

    pub fn post(&self, id: &str) -> Option<Post> { self.posts.lock().unwrap().get(id).cloned() }

    pub fn created(&self) -> Vec<Post> { self.created.lock().unwrap().clone() }

    pub fn updated(&self) -> Vec<Post> { self.updated.lock().unwrap().clone() }

    /// Make every post created in `channel_id` fail.
    pub fn fail_posts_to(&self, channel_id: &str) {
        self.failing_channels.lock().unwrap().insert(channel_id.to_string());
    }
}

#[async_trait]
impl ChatClient for FakeChat {
    async fn get_user(&self, user_id: &str) -> Result<User, HostApiError> {
        self.users.lock().unwrap().get(user_id).cloned().ok_or_else(|| host_not_found("user"))
    }

    async fn get_channel(&self, channel_id: &str) -> Result<Channel, HostApiError> {
        self.channels
            .lock()
            .unwrap()
            .get(channel_id)
            .cloned()
            .ok_or_else(|| host_not_found("channel"))
    }

    async fn get_post(&self, post_id: &str) -> Result<Post, HostApiError> {
        self.post(post_id).ok_or_else(|| host_not_found("post"))
    }

    async fn update_post(&self, post: &Post) -> Result<Post, HostApiError> {
        self.posts.lock().unwrap().insert(post.id.clone(), post.clone());
        self.updated.lock().unwrap().push(post.clone());
        Ok(post.clone())
    }

    async fn create_post(&self, post: &Post) -> Result<Post, HostApiError> {
        if self.failing_channels.lock().unwrap().contains(&post.channel_id) {
            return Err(HostApiError::Status {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "unavailable".to_string(),
            });
        }
        let mut post = post.clone();
        post.id = format!("post-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.created.lock().unwrap().push(post.clone());
        self.posts.lock().unwrap().insert(post.id.clone(), post.clone());
        Ok(post)
    }
}

#[derive(Default)]
pub struct FakeCi {
    /// `None` makes the job query fail.
    jobs: Mutex<Option<Vec<WorkflowJob>>>,
    approvals: Mutex<Vec<(String, String, String)>>,
    pub fail_approve: AtomicBool,
}

impl FakeCi {
    pub fn set_jobs(&self, jobs: Option<Vec<WorkflowJob>>) { *self.jobs.lock().unwrap() = jobs; }

    /// Recorded `(token, workflow_id, approval_request_id)` approve calls.
    pub fn approvals(&self) -> Vec<(String, String, String)> {
        self.approvals.lock().unwrap().clone()
    }
}

#[async_trait]
impl CiClient for FakeCi {
    async fn current_user(&self, token: &str) -> Result<CircleCiUser, ExternalApiError> {
        if token.starts_with("valid") {
            Ok(CircleCiUser { id: "ci-user".to_string(), login: "alice-ci".to_string(), name: None })
        } else {
            Err(ExternalApiError::Status {
                status: StatusCode::UNAUTHORIZED,
                message: "Invalid token provided.".to_string(),
            })
        }
    }

    async fn workflow_jobs(
        &self,
        _token: &str,
        _workflow_id: &str,
    ) -> Result<Vec<WorkflowJob>, ExternalApiError> {
        self.jobs.lock().unwrap().clone().ok_or_else(|| ExternalApiError::Status {
            status: StatusCode::BAD_GATEWAY,
            message: "upstream unavailable".to_string(),
        })
    }

    async fn approve_job(
        &self,
        token: &str,
        workflow_id: &str,
        approval_request_id: &str,
    ) -> Result<(), ExternalApiError> {
        self.approvals.lock().unwrap().push((
            token.to_string(),
            workflow_id.to_string(),
            approval_request_id.to_string(),
        ));
        if self.fail_approve.load(Ordering::SeqCst) {
            return Err(ExternalApiError::Status {
                status: StatusCode::NOT_FOUND,
                message: "Approval request not found".to_string(),
            });
        }
        Ok(())
    }
}

pub struct TestBot {
    pub ctx: BotContext,
    pub chat: Arc<FakeChat>,
    pub ci: Arc<FakeCi>,
    pub tokens: Arc<MemoryTokenStore>,
}

impl TestBot {
    pub fn new() -> Self {
        let chat = Arc::new(FakeChat::default());
        chat.add_user("alice", "alice");
        chat.add_user("bob", "bob");
        chat.add_channel("C1", "town-square");
        chat.add_channel("C2", "builds");
        let ci = Arc::new(FakeCi::default());
        let tokens = Arc::new(MemoryTokenStore::new());
        let ctx = BotContext {
            settings: Arc::new(settings()),
            subscriptions: Arc::new(MemorySubscriptionStore::new()),
            tokens: tokens.clone(),
            ci: ci.clone(),
            chat: chat.clone(),
        };
        Self { ctx, chat, ci, tokens }
    }
}

pub fn settings() -> BotSettings {
    BotSettings {
        command_trigger: "circleci".to_string(),
        bot_user_id: "bot".to_string(),
        approve_url: "https://relay.example/api/actions/approve".to_string(),
        webhook_url: "https://relay.example/api/webhook".to_string(),
        store_attempts: 3,
        command_token: COMMAND_TOKEN.to_string(),
        signer: ContextSigner::new("test-signing-secret"),
    }
}

pub fn event(project: &ProjectIdentifier, status: EventStatus) -> CiEvent {
    CiEvent {
        project: project.clone(),
        workflow_id: "wf-1".to_string(),
        job_name: "deploy".to_string(),
        status,
        approval_request_id: None,
        build_url: Some("https://circleci.com/gh/acme/widgets/42".to_string()),
        build_number: Some(42),
        branch: Some("main".to_string()),
        username: Some("alice".to_string()),
    }
}

pub fn job(name: &str, approval_request_id: Option<&str>) -> WorkflowJob {
    WorkflowJob {
        id: None,
        name: name.to_string(),
        status: if approval_request_id.is_some() { "on_hold" } else { "success" }.to_string(),
        kind: Some(if approval_request_id.is_some() { "approval" } else { "build" }.to_string()),
        job_number: None,
        approval_request_id: approval_request_id.map(str::to_string),
    }
}
