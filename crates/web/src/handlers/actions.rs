use axum::{Json, body::Bytes, extract::State};
use ci_relay_bot::{
    BotContext,
    approval::{ApprovalRequest, approve as approve_workflow},
    signing::ContextSigner,
};
use ci_relay_mattermost::models::{PostActionRequest, PostActionResponse};

const INVALID_REQUEST: &str =
    "Unable to approve the job: the request did not carry the workflow to approve.";

fn parse_request(body: &[u8], signer: &ContextSigner) -> Result<ApprovalRequest, String> {
    if body.is_empty() {
        return Err("empty action body".to_string());
    }
    let action: PostActionRequest =
        serde_json::from_slice(body).map_err(|e| format!("error parsing action body: {e}"))?;
    ApprovalRequest::from_action(&action, signer).map_err(|e| e.to_string())
}

/// Approve button callback. Malformed requests get an ephemeral error; the outcome of an
/// approval attempt is posted in the notification thread.
pub async fn approve(State(bot): State<BotContext>, body: Bytes) -> Json<PostActionResponse> {
    let request = match parse_request(&body, &bot.settings.signer) {
        Ok(request) => request,
        Err(e) => {
            tracing::error!("Invalid approval request: {e}");
            return Json(PostActionResponse::ephemeral(INVALID_REQUEST));
        }
    };
    approve_workflow(&bot, &request).await;
    Json(PostActionResponse::default())
}
