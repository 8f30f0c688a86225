//! `/<trigger> subscription ...`

use std::fmt::Write;

use ci_relay_core::{
    models::{ProjectIdentifier, ProjectParseError, Subscription, SubscriptionFlag, SubscriptionFlags},
    store::{StoreError, modify_subscriptions},
};
use ci_relay_mattermost::models::{CommandArgs, CommandResponse, Post};

use super::INTERNAL_ERROR;
use crate::BotContext;

pub const UNKNOWN_CHANNEL: &str = "Unknown channel";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionCommand {
    Help,
    List,
    Add { flags: SubscriptionFlags, project: ProjectIdentifier },
    Remove { project: ProjectIdentifier },
    ListChannels { project: ProjectIdentifier },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("incorrect subcommand `{0}`")]
    IncorrectSubcommand(String),
    /// Holds the raw token as typed.
    #[error("unknown subscription flag `{0}`")]
    UnknownFlag(String),
    #[error("missing project")]
    MissingProject,
    #[error(transparent)]
    InvalidProject(#[from] ProjectParseError),
    #[error("unexpected argument `{0}`")]
    UnexpectedArgument(String),
}

fn parse_project(args: &[&str]) -> Result<ProjectIdentifier, ParseError> {
    match args {
        [] => Err(ParseError::MissingProject),
        [project] => Ok(project.parse()?),
        [_, extra, ..] => Err(ParseError::UnexpectedArgument(extra.to_string())),
    }
}

pub fn parse(args: &[&str]) -> Result<SubscriptionCommand, ParseError> {
    let Some((subcommand, rest)) = args.split_first() else {
        return Ok(SubscriptionCommand::Help);
    };
    match *subcommand {
        "help" => Ok(SubscriptionCommand::Help),
        "list" => match rest.first() {
            Some(extra) => Err(ParseError::UnexpectedArgument(extra.to_string())),
            None => Ok(SubscriptionCommand::List),
        },
        "add" => {
            let mut flags = SubscriptionFlags::default();
            let mut positional = Vec::new();
            for arg in rest {
                match arg.strip_prefix("--") {
                    Some(name) => {
                        flags.add_flag(name).map_err(|_| ParseError::UnknownFlag(arg.to_string()))?
                    }
                    None => positional.push(*arg),
                }
            }
            let project = parse_project(&positional)?;
            Ok(SubscriptionCommand::Add { flags, project })
        }
        "remove" => Ok(SubscriptionCommand::Remove { project: parse_project(rest)? }),
        "list-channels" => Ok(SubscriptionCommand::ListChannels { project: parse_project(rest)? }),
        other => Err(ParseError::IncorrectSubcommand(other.to_string())),
    }
}

pub fn help_text(trigger: &str) -> String {
    let mut text = format!(
        "Manage the CircleCI notifications of this channel. Projects are written \
         `<vcs>/<owner>/<repository>`, with `<vcs>` one of `github` or `bitbucket`.\n\
         * `/{trigger} subscription list` - List the projects this channel is subscribed to\n\
         * `/{trigger} subscription add [--flag]... <project>` - Subscribe this channel to a project\n\
         * `/{trigger} subscription remove <project>` - Unsubscribe this channel from a project\n\
         * `/{trigger} subscription list-channels <project>` - List the channels subscribed to a project\n\
         Available flags:"
    );
    for flag in SubscriptionFlag::variants() {
        let _ = write!(text, "\n* `--{}` - {}", flag.as_str(), flag.description());
    }
    text
}

fn parse_error_text(error: &ParseError, trigger: &str) -> String {
    match error {
        ParseError::IncorrectSubcommand(subcommand) => format!(
            "Incorrect subcommand `{subcommand}`. Try `/{trigger} subscription help`."
        ),
        ParseError::UnknownFlag(flag) => {
            format!("Unknown subscription flag `{flag}`. Try `/{trigger} subscription help`.")
        }
        other => format!("Invalid command: {other}. Try `/{trigger} subscription help`."),
    }
}

fn internal_error(error: StoreError) -> CommandResponse {
    tracing::error!("Subscription store failure: {error:?}");
    CommandResponse::ephemeral(INTERNAL_ERROR)
}

pub async fn execute(ctx: &BotContext, args: &CommandArgs, words: &[&str]) -> CommandResponse {
    let trigger = ctx.settings.command_trigger.as_str();
    let command = match parse(words) {
        Ok(command) => command,
        Err(e) => {
            tracing::debug!(user_id = %args.user_id, "Rejected subscription command: {e}");
            return CommandResponse::ephemeral(parse_error_text(&e, trigger));
        }
    };
    match command {
        SubscriptionCommand::Help => CommandResponse::ephemeral(help_text(trigger)),
        SubscriptionCommand::List => list(ctx, args).await,
        SubscriptionCommand::Add { flags, project } => add(ctx, args, flags, project).await,
        SubscriptionCommand::Remove { project } => remove(ctx, args, project).await,
        SubscriptionCommand::ListChannels { project } => list_channels(ctx, project).await,
    }
}

/// ` by @name`, or nothing when the user cannot be looked up.
async fn actor_suffix(ctx: &BotContext, user_id: &str) -> String {
    ctx.username(user_id).await.map(|name| format!(" by {name}")).unwrap_or_default()
}

async fn list(ctx: &BotContext, args: &CommandArgs) -> CommandResponse {
    let list = match ctx.subscriptions.get_all().await {
        Ok(document) => document.value,
        Err(e) => return internal_error(e),
    };
    let subscriptions = list.by_channel(&args.channel_id).collect::<Vec<_>>();
    if subscriptions.is_empty() {
        return CommandResponse::ephemeral(format!(
            ":information_source: This channel is not subscribed to any repository. Try `/{} subscription add <project>`.",
            ctx.settings.command_trigger
        ));
    }
    let mut text = "This channel is subscribed to:".to_string();
    for subscription in subscriptions {
        let creator = ctx.user_label(&subscription.creator_id).await;
        let _ = write!(
            text,
            "\n- {} with flags `{}` (created by {creator})",
            subscription.project.to_markdown(),
            subscription.flags
        );
    }
    CommandResponse::ephemeral(text)
}

async fn add(
    ctx: &BotContext,
    args: &CommandArgs,
    flags: SubscriptionFlags,
    project: ProjectIdentifier,
) -> CommandResponse {
    let subscription = Subscription {
        channel_id: args.channel_id.clone(),
        creator_id: args.user_id.clone(),
        flags: flags.clone(),
        project: project.clone(),
    };
    let was_update = match modify_subscriptions(
        ctx.subscriptions.as_ref(),
        ctx.settings.store_attempts,
        |list| list.add_or_update(subscription.clone()),
    )
    .await
    {
        Ok(was_update) => was_update,
        Err(e) => return internal_error(e),
    };
    tracing::info!(
        channel_id = %args.channel_id,
        project = %project,
        flags = %flags,
        was_update,
        "Saved subscription"
    );

    let by = actor_suffix(ctx, &args.user_id).await;
    let notice = if was_update {
        format!(
            "The subscription for this channel to the project {} has been updated with flags `{flags}`{by}",
            project.to_markdown()
        )
    } else {
        format!(
            "This channel has been subscribed to notifications from the project {} with flags: `{flags}`{by}",
            project.to_markdown()
        )
    };
    ctx.post_as_bot(Post::new(args.channel_id.clone(), notice)).await;

    let title = if was_update { "Subscription updated!" } else { "Subscription saved!" };
    CommandResponse::ephemeral(format!(
        "{title} Configure the CircleCI jobs of {} to send their notifications to `{}`.",
        project.full_name(),
        ctx.settings.webhook_url
    ))
}

async fn remove(ctx: &BotContext, args: &CommandArgs, project: ProjectIdentifier) -> CommandResponse {
    let removed = match modify_subscriptions(
        ctx.subscriptions.as_ref(),
        ctx.settings.store_attempts,
        |list| list.remove(&args.channel_id, &project),
    )
    .await
    {
        Ok(removed) => removed,
        Err(e) => return internal_error(e),
    };
    if !removed {
        return CommandResponse::ephemeral(format!(
            "This channel was not subscribed to {}",
            project.to_markdown()
        ));
    }
    tracing::info!(channel_id = %args.channel_id, project = %project, "Removed subscription");

    let by = actor_suffix(ctx, &args.user_id).await;
    let notice = format!(
        "This channel has been unsubscribed from notifications from the project {}{by}",
        project.to_markdown()
    );
    ctx.post_as_bot(Post::new(args.channel_id.clone(), notice)).await;
    CommandResponse::ephemeral(format!("Subscription to {} removed.", project.full_name()))
}

async fn list_channels(ctx: &BotContext, project: ProjectIdentifier) -> CommandResponse {
    let list = match ctx.subscriptions.get_all().await {
        Ok(document) => document.value,
        Err(e) => return internal_error(e),
    };
    let channel_ids = list.channels_for_project(&project);
    if channel_ids.is_empty() {
        return CommandResponse::ephemeral(format!(
            "No channel is subscribed to {}",
            project.to_markdown()
        ));
    }
    let mut text = format!("Channels subscribed to {}:", project.to_markdown());
    for channel_id in channel_ids {
        match ctx.chat.get_channel(channel_id).await {
            Ok(channel) => {
                let _ = write!(text, "\n- ~{}", channel.name);
            }
            Err(e) => {
                tracing::warn!(channel_id, "Unable to get channel: {e}");
                let _ = write!(text, "\n- {UNKNOWN_CHANNEL}");
            }
        }
    }
    CommandResponse::ephemeral(text)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use ci_relay_core::{
        models::{SubscriptionList, VcsKind},
        store::{SubscriptionStore, Versioned},
    };

    use super::*;
    use crate::test_utils::TestBot;

    fn widgets() -> ProjectIdentifier { ProjectIdentifier::new(VcsKind::GitHub, "acme", "widgets") }

    fn args(channel_id: &str, user_id: &str) -> CommandArgs {
        CommandArgs {
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            ..Default::default()
        }
    }

    async fn run(bot: &TestBot, channel_id: &str, user_id: &str, text: &str) -> String {
        let words = text.split_whitespace().collect::<Vec<_>>();
        execute(&bot.ctx, &args(channel_id, user_id), &words).await.text
    }

    async fn stored(bot: &TestBot) -> Versioned<SubscriptionList> {
        bot.ctx.subscriptions.get_all().await.unwrap()
    }

    #[test]
    fn test_parse() {
        assert_eq!(parse(&[]), Ok(SubscriptionCommand::Help));
        assert_eq!(parse(&["help"]), Ok(SubscriptionCommand::Help));
        assert_eq!(parse(&["list"]), Ok(SubscriptionCommand::List));
        assert_eq!(
            parse(&["add", "gh/acme/widgets", "--only-failed-jobs"]),
            Ok(SubscriptionCommand::Add {
                flags: [SubscriptionFlag::OnlyFailedJobs].into_iter().collect(),
                project: widgets(),
            })
        );
        assert_eq!(
            parse(&["remove", "github/acme/widgets"]),
            Ok(SubscriptionCommand::Remove { project: widgets() })
        );
        assert_eq!(
            parse(&["list-channels", "github/acme/widgets"]),
            Ok(SubscriptionCommand::ListChannels { project: widgets() })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse(&["subscribe"]), Err(ParseError::IncorrectSubcommand("subscribe".into())));
        assert_eq!(
            parse(&["add", "--only-failed", "github/acme/widgets"]),
            Err(ParseError::UnknownFlag("--only-failed".into()))
        );
        // Flags are case-sensitive
        assert_eq!(
            parse(&["add", "--Only-Failed-Jobs", "github/acme/widgets"]),
            Err(ParseError::UnknownFlag("--Only-Failed-Jobs".into()))
        );
        assert_eq!(parse(&["add"]), Err(ParseError::MissingProject));
        assert_eq!(
            parse(&["remove", "github/acme/widgets", "extra"]),
            Err(ParseError::UnexpectedArgument("extra".into()))
        );
        assert!(matches!(parse(&["add", "gitlab/acme/widgets"]), Err(ParseError::InvalidProject(_))));
    }

    #[tokio::test]
    async fn test_add_then_update() {
        let bot = TestBot::new();
        let text = run(&bot, "C1", "alice", "add github/acme/widgets").await;
        assert!(text.starts_with("Subscription saved!"), "{text}");
        assert!(text.contains("https://relay.example/api/webhook"));

        let text = run(&bot, "C1", "bob", "add --only-failed-jobs github/acme/widgets").await;
        assert!(text.starts_with("Subscription updated!"), "{text}");

        let document = stored(&bot).await;
        assert_eq!(document.value.len(), 1);
        assert_eq!(document.value.subscriptions[0].creator_id, "bob");
        assert!(document.value.subscriptions[0].flags.contains(SubscriptionFlag::OnlyFailedJobs));

        let notices = bot.chat.created();
        assert_eq!(notices.len(), 2);
        assert!(notices[0].message.starts_with("This channel has been subscribed"));
        assert!(notices[0].message.ends_with("with flags: `none` by @alice"));
        assert!(notices[1].message.contains("has been updated with flags `only-failed-jobs` by @bob"));
    }

    #[tokio::test]
    async fn test_notices_omit_unknown_actor() {
        let bot = TestBot::new();
        run(&bot, "C1", "carol", "add github/acme/widgets").await;
        run(&bot, "C1", "carol", "remove github/acme/widgets").await;

        let notices = bot.chat.created();
        assert_eq!(notices.len(), 2);
        assert!(notices[0].message.ends_with("with flags: `none`"), "{}", notices[0].message);
        assert!(notices[1].message.ends_with("/acme/widgets)"), "{}", notices[1].message);
        assert!(notices.iter().all(|notice| !notice.message.contains("Unknown user")));
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let bot = TestBot::new();
        run(&bot, "C1", "alice", "add github/acme/widgets").await;
        let before = stored(&bot).await;
        run(&bot, "C1", "alice", "add github/acme/widgets").await;
        assert_eq!(stored(&bot).await, before);
    }

    #[tokio::test]
    async fn test_unknown_flag_leaves_store_untouched() {
        let bot = TestBot::new();
        let text = run(&bot, "C1", "alice", "add --only-failed-jobs --loud github/acme/widgets").await;
        assert_eq!(text, "Unknown subscription flag `--loud`. Try `/circleci subscription help`.");
        assert_eq!(stored(&bot).await, Versioned::default());
        assert!(bot.chat.created().is_empty());
    }

    #[tokio::test]
    async fn test_remove() {
        let bot = TestBot::new();
        let text = run(&bot, "C1", "alice", "remove github/acme/widgets").await;
        assert_eq!(
            text,
            "This channel was not subscribed to [acme/widgets](https://app.circleci.com/pipelines/github/acme/widgets)"
        );

        run(&bot, "C1", "alice", "add github/acme/widgets").await;
        run(&bot, "C2", "alice", "add github/acme/widgets").await;
        let text = run(&bot, "C1", "alice", "remove github/acme/widgets").await;
        assert_eq!(text, "Subscription to acme/widgets removed.");

        let remaining = stored(&bot).await.value;
        assert_eq!(remaining.channels_for_project(&widgets()), vec!["C2"]);
        assert!(bot.chat.created().last().unwrap().message.contains("unsubscribed"));
    }

    #[tokio::test]
    async fn test_list() {
        let bot = TestBot::new();
        let text = run(&bot, "C1", "alice", "list").await;
        assert!(text.starts_with(":information_source: This channel is not subscribed"));

        run(&bot, "C1", "alice", "add --only-failed-jobs github/acme/widgets").await;
        run(&bot, "C1", "carol", "add bitbucket/acme/gadgets").await;
        run(&bot, "C2", "alice", "add github/acme/other").await;
        let text = run(&bot, "C1", "alice", "list").await;
        assert_eq!(
            text,
            "This channel is subscribed to:\n\
             - [acme/widgets](https://app.circleci.com/pipelines/github/acme/widgets) with flags `only-failed-jobs` (created by @alice)\n\
             - [acme/gadgets](https://app.circleci.com/pipelines/bitbucket/acme/gadgets) with flags `none` (created by Unknown user)"
        );
    }

    #[tokio::test]
    async fn test_list_channels() {
        let bot = TestBot::new();
        let text = run(&bot, "C1", "alice", "list-channels github/acme/widgets").await;
        assert!(text.starts_with("No channel is subscribed to"));

        run(&bot, "C1", "alice", "add github/acme/widgets").await;
        run(&bot, "C2", "alice", "add github/acme/widgets").await;
        run(&bot, "C9", "alice", "add github/acme/widgets").await;
        let text = run(&bot, "C1", "alice", "list-channels github/acme/widgets").await;
        assert_eq!(
            text,
            "Channels subscribed to [acme/widgets](https://app.circleci.com/pipelines/github/acme/widgets):\n\
             - ~town-square\n\
             - ~builds\n\
             - Unknown channel"
        );
    }

    struct BrokenStore;

    #[async_trait]
    impl SubscriptionStore for BrokenStore {
        async fn get_all(&self) -> Result<Versioned<SubscriptionList>, StoreError> {
            Err(StoreError::Backend(anyhow::anyhow!("disk on fire")))
        }

        async fn save(&self, _: &SubscriptionList, _: u64) -> Result<u64, StoreError> {
            Err(StoreError::Backend(anyhow::anyhow!("disk on fire")))
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_internal_error() {
        let mut bot = TestBot::new();
        bot.ctx.subscriptions = std::sync::Arc::new(BrokenStore);
        for command in ["list", "add github/acme/widgets", "remove github/acme/widgets"] {
            let text = run(&bot, "C1", "alice", command).await;
            assert_eq!(text, INTERNAL_ERROR);
            assert!(!text.contains("disk on fire"));
        }
    }
}
