use axum::{Form, Json, extract::State};
use ci_relay_bot::{BotContext, command::execute};
use ci_relay_mattermost::models::{CommandArgs, CommandResponse};

pub async fn command(
    State(bot): State<BotContext>,
    Form(args): Form<CommandArgs>,
) -> Json<CommandResponse> {
    Json(execute(&bot, &args).await)
}
