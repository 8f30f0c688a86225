//! Approval of a CI approval gate from a button click on a notification.

use ci_relay_circleci::{ExternalApiError, WorkflowJob};
use ci_relay_core::{
    models::{ApprovalContext, workflow_run_url},
    store::StoreError,
};
use ci_relay_mattermost::models::{Attachment, Post, PostActionRequest};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    BotContext,
    router::APPROVE_ACTION_ID,
    signing::{ContextSigner, SIGNATURE_KEY},
};

const COLOR_APPROVED: &str = "#50F100";

/// A validated approve click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub user_id: String,
    pub post_id: String,
    pub channel_id: String,
    pub context: ApprovalContext,
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidApprovalRequest {
    #[error("approval request is missing `{0}`")]
    MissingField(&'static str),
    #[error("approval request has an invalid context")]
    Context(#[from] serde_json::Error),
    #[error("approval context signature does not match")]
    BadSignature,
}

impl ApprovalRequest {
    /// Validate a click. The context must carry the signature added when the button was
    /// posted.
    pub fn from_action(
        action: &PostActionRequest,
        signer: &ContextSigner,
    ) -> Result<Self, InvalidApprovalRequest> {
        if action.user_id.is_empty() {
            return Err(InvalidApprovalRequest::MissingField("user_id"));
        }
        if action.post_id.is_empty() {
            return Err(InvalidApprovalRequest::MissingField("post_id"));
        }
        if action.context.is_null() {
            return Err(InvalidApprovalRequest::MissingField("context"));
        }
        let context = ApprovalContext::deserialize(&action.context)?;
        if context.workflow_id.is_empty() {
            return Err(InvalidApprovalRequest::MissingField("workflow_id"));
        }
        let signature = action
            .context
            .get(SIGNATURE_KEY)
            .and_then(Value::as_str)
            .ok_or(InvalidApprovalRequest::MissingField(SIGNATURE_KEY))?;
        if !signer.verify(&context, signature) {
            return Err(InvalidApprovalRequest::BadSignature);
        }
        Ok(Self {
            user_id: action.user_id.clone(),
            post_id: action.post_id.clone(),
            channel_id: action.channel_id.clone(),
            context,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApprovalFailure {
    #[error("no CircleCI token connected")]
    MissingToken,
    #[error("failed to read token")]
    TokenLookup(#[source] StoreError),
    #[error("failed to list workflow jobs")]
    JobsUnavailable(#[source] ExternalApiError),
    #[error("no job is waiting for approval")]
    NoPendingGate,
    #[error("several jobs are waiting for approval: {}", .0.join(", "))]
    AmbiguousGate(Vec<String>),
    #[error("approve call failed")]
    ApproveFailed(#[source] ExternalApiError),
}

#[derive(Debug)]
pub enum ApprovalOutcome {
    Approved { workflow_id: String, approver: String },
    Failed { workflow_id: String, reason: ApprovalFailure },
}

impl ApprovalOutcome {
    pub fn is_approved(&self) -> bool { matches!(self, Self::Approved { .. }) }

    /// Text posted in the thread of the notification.
    pub fn message(&self, command_trigger: &str) -> String {
        match self {
            Self::Approved { approver, .. } => {
                format!("Job successfully approved by {approver} :+1:")
            }
            Self::Failed { workflow_id, reason } => {
                let mut message = format!(
                    "Cannot approve the Job from Mattermost. Please approve [here]({})",
                    workflow_run_url(workflow_id)
                );
                match reason {
                    ApprovalFailure::MissingToken => message.push_str(&format!(
                        "\nConnect your CircleCI account with `/{command_trigger} account connect <token>` to approve from Mattermost."
                    )),
                    ApprovalFailure::AmbiguousGate(_) => message.push_str(&format!(
                        "\nSeveral approvals are pending in workflow `{workflow_id}`."
                    )),
                    _ => {}
                }
                message
            }
        }
    }
}

/// Drop the approve action from every attachment carrying it, marking those attachments
/// as approved. Returns how many attachments changed.
pub fn strip_approve_action(attachments: &mut [Attachment], approver: &str) -> usize {
    let mut changed = 0;
    for attachment in attachments {
        let before = attachment.actions.len();
        attachment.actions.retain(|action| action.id != APPROVE_ACTION_ID);
        if attachment.actions.len() == before {
            continue;
        }
        attachment.color = COLOR_APPROVED.to_string();
        attachment.title = format!("This CircleCI workflow has been approved by {approver}");
        changed += 1;
    }
    changed
}

/// The single approval request id among `jobs`.
pub fn select_gate(jobs: &[WorkflowJob]) -> Result<String, ApprovalFailure> {
    let mut pending = jobs.iter().filter_map(WorkflowJob::approval_request_id).collect::<Vec<_>>();
    pending.sort_unstable();
    pending.dedup();
    match pending.as_slice() {
        [] => Err(ApprovalFailure::NoPendingGate),
        [id] => Ok(id.to_string()),
        ids => Err(ApprovalFailure::AmbiguousGate(ids.iter().map(|id| id.to_string()).collect())),
    }
}

/// Where the outcome of an approval is posted.
struct ReplyTarget {
    channel_id: String,
    root_id: String,
}

/// Mark the notification as approved and find the thread to reply in. Falls back to the
/// ids of the click when the post cannot be fetched.
async fn mark_post_approved(
    ctx: &BotContext,
    request: &ApprovalRequest,
    approver: &str,
) -> ReplyTarget {
    let post_id = request.post_id.as_str();
    let mut post = match ctx.chat.get_post(post_id).await {
        Ok(post) => post,
        Err(e) => {
            tracing::error!(post_id, "Unable to get post: {e}");
            return ReplyTarget {
                channel_id: request.channel_id.clone(),
                root_id: post_id.to_string(),
            };
        }
    };
    let target = ReplyTarget {
        channel_id: post.channel_id.clone(),
        root_id: if post.root_id.is_empty() { post.id.clone() } else { post.root_id.clone() },
    };

    let mut attachments = match post.attachments() {
        Ok(attachments) => attachments,
        Err(e) => {
            tracing::error!(post_id, "Unable to decode post attachments: {e}");
            return target;
        }
    };
    if strip_approve_action(&mut attachments, approver) == 0 {
        return target;
    }
    if let Err(e) = post.set_attachments(&attachments) {
        tracing::error!(post_id, "Unable to encode post attachments: {e}");
        return target;
    }
    if let Err(e) = ctx.chat.update_post(&post).await {
        tracing::error!(post_id, "Unable to update post: {e}");
    }
    target
}

async fn approve_gate(ctx: &BotContext, request: &ApprovalRequest) -> Result<(), ApprovalFailure> {
    let token = ctx
        .tokens
        .token_for_user(&request.user_id)
        .await
        .map_err(ApprovalFailure::TokenLookup)?
        .ok_or(ApprovalFailure::MissingToken)?;
    let workflow_id = &request.context.workflow_id;
    let jobs =
        ctx.ci.workflow_jobs(&token, workflow_id).await.map_err(ApprovalFailure::JobsUnavailable)?;
    let gate = select_gate(&jobs)?;
    ctx.ci.approve_job(&token, workflow_id, &gate).await.map_err(ApprovalFailure::ApproveFailed)
}

/// Handle an approve click end to end. The outcome is also posted as a reply under the
/// notification.
pub async fn approve(ctx: &BotContext, request: &ApprovalRequest) -> ApprovalOutcome {
    let approver = ctx.user_label(&request.user_id).await;
    let target = mark_post_approved(ctx, request, &approver).await;

    let workflow_id = request.context.workflow_id.clone();
    let outcome = match approve_gate(ctx, request).await {
        Ok(()) => {
            tracing::info!(
                workflow_id = %workflow_id,
                user_id = %request.user_id,
                "Approved workflow"
            );
            ApprovalOutcome::Approved { workflow_id, approver }
        }
        Err(reason) => {
            tracing::warn!(
                workflow_id = %workflow_id,
                user_id = %request.user_id,
                "Approval failed: {reason:?}"
            );
            ApprovalOutcome::Failed { workflow_id, reason }
        }
    };

    let reply = Post::reply(
        target.channel_id,
        target.root_id,
        outcome.message(&ctx.settings.command_trigger),
    );
    ctx.post_as_bot(reply).await;
    outcome
}
