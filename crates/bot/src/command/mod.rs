//! Slash command entry point.

pub mod account;
pub mod subscription;

use ci_relay_mattermost::models::{CommandArgs, CommandResponse};

use crate::{BotContext, signing};

pub(crate) const INTERNAL_ERROR: &str = ":red_circle: Internal error, please try again later";
const UNVERIFIED_COMMAND: &str = "This request did not come from the configured slash command.";

/// Split the command text into words, dropping the leading `/<trigger>`.
fn words<'a>(text: &'a str, trigger: &str) -> Vec<&'a str> {
    let mut words = text.split_whitespace().collect::<Vec<_>>();
    if words.first().is_some_and(|first| first.strip_prefix('/') == Some(trigger)) {
        words.remove(0);
    }
    words
}

pub fn help_text(trigger: &str) -> String {
    format!(
        "Available commands:\n\
         * `/{trigger} subscription <list|add|remove|list-channels|help>` - Manage the CircleCI notifications of this channel\n\
         * `/{trigger} account <connect|disconnect|help>` - Link your CircleCI account to approve jobs from Mattermost\n\
         * `/{trigger} help` - Show this help"
    )
}

/// Run a slash command. Always answers with an ephemeral response. Invocations without the
/// configured command token are refused before anything is read or written.
pub async fn execute(ctx: &BotContext, args: &CommandArgs) -> CommandResponse {
    if !signing::command_token_matches(&ctx.settings.command_token, &args.token) {
        tracing::warn!(
            user_id = %args.user_id,
            channel_id = %args.channel_id,
            "Slash command with invalid token"
        );
        return CommandResponse::ephemeral(UNVERIFIED_COMMAND);
    }
    let trigger = ctx.settings.command_trigger.as_str();
    let words = words(&args.text, trigger);
    let (command, rest) = match words.split_first() {
        Some((command, rest)) => (*command, rest),
        None => ("help", &[][..]),
    };
    tracing::debug!(command, user_id = %args.user_id, channel_id = %args.channel_id, "Slash command");
    match command {
        "subscription" => subscription::execute(ctx, args, rest).await,
        "account" => account::execute(ctx, args, rest).await,
        "help" => CommandResponse::ephemeral(help_text(trigger)),
        other => CommandResponse::ephemeral(format!(
            "Unknown command `{other}`. Try `/{trigger} help`."
        )),
    }
}
