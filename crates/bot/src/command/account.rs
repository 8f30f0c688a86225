//! `/<trigger> account ...`: the per-user CircleCI token used to approve jobs.

use ci_relay_mattermost::models::{CommandArgs, CommandResponse};

use super::INTERNAL_ERROR;
use crate::BotContext;

pub fn help_text(trigger: &str) -> String {
    format!(
        "Link your CircleCI account to approve jobs from Mattermost.\n\
         * `/{trigger} account connect <personal API token>` - Store your CircleCI token\n\
         * `/{trigger} account disconnect` - Forget your CircleCI token"
    )
}

pub async fn execute(ctx: &BotContext, args: &CommandArgs, words: &[&str]) -> CommandResponse {
    let trigger = ctx.settings.command_trigger.as_str();
    match words {
        [] | ["help"] => CommandResponse::ephemeral(help_text(trigger)),
        ["connect", token] => connect(ctx, args, token).await,
        ["disconnect"] => disconnect(ctx, args).await,
        _ => CommandResponse::ephemeral(format!(
            "Incorrect account command. Try `/{trigger} account help`."
        )),
    }
}

async fn connect(ctx: &BotContext, args: &CommandArgs, token: &str) -> CommandResponse {
    let user = match ctx.ci.current_user(token).await {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(user_id = %args.user_id, "Rejected CircleCI token: {e}");
            return CommandResponse::ephemeral(
                "CircleCI did not accept this token. Check that it is a valid personal API token.",
            );
        }
    };
    if let Err(e) = ctx.tokens.store_token(&args.user_id, token).await {
        tracing::error!(user_id = %args.user_id, "Unable to store token: {e:?}");
        return CommandResponse::ephemeral(INTERNAL_ERROR);
    }
    tracing::info!(user_id = %args.user_id, login = %user.login, "Connected CircleCI account");
    CommandResponse::ephemeral(format!("Your CircleCI account `{}` is now connected.", user.login))
}

async fn disconnect(ctx: &BotContext, args: &CommandArgs) -> CommandResponse {
    match ctx.tokens.delete_token(&args.user_id).await {
        Ok(true) => {
            tracing::info!(user_id = %args.user_id, "Disconnected CircleCI account");
            CommandResponse::ephemeral("Your CircleCI account has been disconnected.")
        }
        Ok(false) => CommandResponse::ephemeral("No CircleCI account is connected."),
        Err(e) => {
            tracing::error!(user_id = %args.user_id, "Unable to delete token: {e:?}");
            CommandResponse::ephemeral(INTERNAL_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use ci_relay_core::store::TokenStore;

    use super::*;
    use crate::test_utils::TestBot;

    async fn run(bot: &TestBot, text: &str) -> String {
        let args = CommandArgs {
            channel_id: "C1".to_string(),
            user_id: "alice".to_string(),
            ..Default::default()
        };
        let words = text.split_whitespace().collect::<Vec<_>>();
        execute(&bot.ctx, &args, &words).await.text
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let bot = TestBot::new();
        let text = run(&bot, "connect valid-token").await;
        assert_eq!(text, "Your CircleCI account `alice-ci` is now connected.");
        assert_eq!(bot.tokens.token_for_user("alice").await.unwrap().as_deref(), Some("valid-token"));

        let text = run(&bot, "disconnect").await;
        assert_eq!(text, "Your CircleCI account has been disconnected.");
        assert_eq!(bot.tokens.token_for_user("alice").await.unwrap(), None);
        let text = run(&bot, "disconnect").await;
        assert_eq!(text, "No CircleCI account is connected.");
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_token() {
        let bot = TestBot::new();
        let text = run(&bot, "connect nope").await;
        assert!(text.starts_with("CircleCI did not accept this token"));
        assert_eq!(bot.tokens.token_for_user("alice").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incorrect_usage() {
        let bot = TestBot::new();
        assert_eq!(run(&bot, "").await, help_text("circleci"));
        for text in ["connect", "connect a b", "login"] {
            assert_eq!(
                run(&bot, text).await,
                "Incorrect account command. Try `/circleci account help`."
            );
        }
    }
}
