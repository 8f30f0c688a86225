use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ci_relay_bot::{BotContext, router::dispatch_event};
use ci_relay_circleci::webhook::CiEventPayload;
use ci_relay_core::AppError;

/// Fan a CI notification out to the subscribed channels.
pub async fn webhook(
    State(bot): State<BotContext>,
    CiEventPayload { event }: CiEventPayload,
) -> Result<Response, AppError> {
    tracing::info!(
        project = %event.project,
        workflow_id = %event.workflow_id,
        job = %event.job_name,
        status = event.status.as_str(),
        "Received CI event"
    );
    let delivered = dispatch_event(&bot, &event).await?;
    Ok((StatusCode::OK, format!("Delivered to {delivered} channel(s)")).into_response())
}
