//! Fan-out of inbound CI events to subscribed channels.

use anyhow::{Context, Result};
use ci_relay_core::models::{
    ApprovalContext, CiEvent, EventStatus, Subscription, SubscriptionFlag, SubscriptionList,
};
use ci_relay_mattermost::models::{
    Attachment, AttachmentField, Post, PostAction, PostActionIntegration,
};
use serde_json::Value;

use crate::{BotContext, BotSettings, signing::SIGNATURE_KEY};

/// Action id of the approve button. The approval workflow only strips actions with this
/// id.
pub const APPROVE_ACTION_ID: &str = "approvecirclecijob";

const COLOR_SUCCESS: &str = "#50F100";
const COLOR_FAILED: &str = "#F2161A";
const COLOR_APPROVAL: &str = "#8C5CE6";
const COLOR_NEUTRAL: &str = "#9AA0A6";

/// Whether `subscription` wants to hear about `event`.
pub fn should_notify(subscription: &Subscription, event: &CiEvent) -> bool {
    if subscription.flags.contains(SubscriptionFlag::OnlyFailedJobs) && !event.status.is_failure()
    {
        return false;
    }
    true
}

/// One post per subscribed channel that accepts the event.
pub fn route(list: &SubscriptionList, event: &CiEvent, settings: &BotSettings) -> Result<Vec<Post>> {
    let mut posts = Vec::new();
    for subscription in list.for_project(&event.project) {
        if !should_notify(subscription, event) {
            tracing::debug!(
                channel_id = %subscription.channel_id,
                status = event.status.as_str(),
                "Event filtered by subscription flags"
            );
            continue;
        }
        posts.push(event_post(&subscription.channel_id, event, settings)?);
    }
    Ok(posts)
}

fn event_post(channel_id: &str, event: &CiEvent, settings: &BotSettings) -> Result<Post> {
    let project = event.project.full_name();
    let (color, pretext) = match event.status {
        EventStatus::Success => (COLOR_SUCCESS, format!("Job `{}` succeeded", event.job_name)),
        EventStatus::Failed => (COLOR_FAILED, format!("Job `{}` failed", event.job_name)),
        EventStatus::AwaitingApproval => {
            (COLOR_APPROVAL, format!("Job `{}` is waiting for approval", event.job_name))
        }
        EventStatus::Running => (COLOR_NEUTRAL, format!("Job `{}` is running", event.job_name)),
        EventStatus::Canceled => (COLOR_NEUTRAL, format!("Job `{}` was canceled", event.job_name)),
        EventStatus::Unknown => {
            (COLOR_NEUTRAL, format!("Job `{}` reported an unknown status", event.job_name))
        }
    };

    let mut fields = vec![AttachmentField {
        title: "Status".to_string(),
        value: event.status.as_str().to_string(),
        short: true,
    }];
    if let Some(branch) = &event.branch {
        fields.push(AttachmentField {
            title: "Branch".to_string(),
            value: branch.clone(),
            short: true,
        });
    }
    if let Some(build_number) = event.build_number {
        fields.push(AttachmentField {
            title: "Build".to_string(),
            value: build_number.to_string(),
            short: true,
        });
    }
    if let Some(username) = &event.username {
        fields.push(AttachmentField {
            title: "Triggered by".to_string(),
            value: username.clone(),
            short: true,
        });
    }

    let mut actions = Vec::new();
    if event.status == EventStatus::AwaitingApproval {
        let context = ApprovalContext {
            workflow_id: event.workflow_id.clone(),
            project: event.project.clone(),
        };
        let mut value =
            serde_json::to_value(&context).context("Failed to encode approval context")?;
        value[SIGNATURE_KEY] = Value::String(settings.signer.sign(&context));
        actions.push(PostAction {
            id: APPROVE_ACTION_ID.to_string(),
            name: "Approve".to_string(),
            kind: "button".to_string(),
            integration: Some(PostActionIntegration {
                url: settings.approve_url.clone(),
                context: value,
            }),
            ..Default::default()
        });
    }

    let attachment = Attachment {
        fallback: format!("{pretext} in {project}"),
        color: color.to_string(),
        pretext,
        title: format!("{project} • {}", event.job_name),
        title_link: event.build_url.clone().unwrap_or_else(|| event.workflow_url()),
        fields,
        actions,
        ..Default::default()
    };
    Post::new(channel_id, "")
        .with_attachments(&[attachment])
        .context("Failed to encode notification attachments")
}

/// Post `event` to every channel subscribed to its project. Returns the number of posts
/// delivered; a failed post to one channel does not stop delivery to the others.
pub async fn dispatch_event(ctx: &BotContext, event: &CiEvent) -> Result<usize> {
    let list = ctx.subscriptions.get_all().await.context("Failed to load subscriptions")?.value;
    let posts = route(&list, event, &ctx.settings)?;
    if posts.is_empty() {
        tracing::debug!(project = %event.project, "No channel to notify");
        return Ok(0);
    }
    let mut delivered = 0;
    for post in posts {
        if ctx.post_as_bot(post).await {
            delivered += 1;
        }
    }
    tracing::info!(
        project = %event.project,
        workflow_id = %event.workflow_id,
        status = event.status.as_str(),
        delivered,
        "Dispatched CI event"
    );
    Ok(delivered)
}
