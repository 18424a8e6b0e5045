//! Player data commands: playtime lookup and chat preferences.

use hearth_db::{ChatColor, PlayerId, PlayerName, PlayerRecord};
use std::sync::Arc;

use crate::cache::RecordCache;
use crate::dispatcher::{CommandHandler, CommandTask, Dispatcher, Invocation, Reply};
use crate::error::{CommandError, ParseError};
use crate::helpers::{format_duration, format_timestamp};
use crate::validation::{ValidationError, validate_arg_count, validate_player_name};

pub const NEVER_JOINED: &str = "§cThat player has never joined this server or does not exist.";

/// Register the built-in commands.
pub fn register_defaults(dispatcher: &mut Dispatcher, cache: &Arc<RecordCache>) {
    dispatcher
        .register("playtime", PlaytimeCommand::new(Arc::clone(cache)))
        .register("color", ColorCommand::new(Arc::clone(cache)))
        .register("ignore", IgnoreCommand::new(Arc::clone(cache), IgnoreAction::Ignore))
        .register("unignore", IgnoreCommand::new(Arc::clone(cache), IgnoreAction::Unignore));
}

/// A target resolved as far as possible on the main thread.
#[derive(Debug, Clone)]
enum Target {
    /// Id and name captured from live state.
    Known { id: PlayerId, name: PlayerName },
    /// Offline player, resolved through the store later.
    Named(String),
}

impl Target {
    /// Prefer a connected player; otherwise defer the lookup.
    fn lookup(invocation: &Invocation<'_>, name: &str) -> Result<Self, ParseError> {
        validate_player_name(name)?;
        Ok(match invocation.world.find_by_name(name) {
            Some(player) => Target::Known {
                id: player.id(),
                name: player.name(),
            },
            None => Target::Named(name.to_string()),
        })
    }

    async fn resolve(self, cache: &RecordCache) -> Result<Option<(PlayerId, Option<PlayerName>)>, CommandError> {
        match self {
            Target::Known { id, name } => Ok(Some((id, Some(name)))),
            Target::Named(name) => Ok(cache.resolve_name(&name).await?.map(|id| (id, None))),
        }
    }
}

/// `/playtime [player]`: when the player first joined and how long they played.
pub struct PlaytimeCommand {
    cache: Arc<RecordCache>,
}

impl PlaytimeCommand {
    pub fn new(cache: Arc<RecordCache>) -> Self {
        Self { cache }
    }

    fn report(record: &PlayerRecord, shown_name: Option<PlayerName>) -> Reply {
        let Some(first_join) = record.first_join else {
            return Reply::error(NEVER_JOINED);
        };
        let name = shown_name.unwrap_or(record.name);
        Reply::info(format!(
            "§e{} §afirst joined on §e{} §aand has played for §e{} seconds §7({})§a.",
            name,
            format_timestamp(first_join),
            record.played_seconds,
            format_duration(record.played_seconds),
        ))
    }
}

impl CommandHandler for PlaytimeCommand {
    fn prepare(&self, invocation: &Invocation<'_>, args: &[&str]) -> Result<CommandTask, ParseError> {
        validate_arg_count(args, 1)?;

        let target = match (args.first(), invocation.player()) {
            (Some(name), _) => Target::lookup(invocation, name)?,
            (None, Some(player)) => Target::Known {
                id: player.id(),
                name: player.name(),
            },
            (None, None) => return Err(ValidationError::MissingArgument("/playtime <player>")),
        };

        let cache = Arc::clone(&self.cache);
        Ok(Box::pin(async move {
            let Some((id, shown_name)) = target.resolve(&cache).await? else {
                return Ok(Reply::error(NEVER_JOINED));
            };

            cache.retain(id).await;
            let record = cache.get(id).await;
            cache.release(id).await;

            Ok(match record? {
                Some(record) => Self::report(&record, shown_name),
                None => Reply::error(NEVER_JOINED),
            })
        }))
    }
}

/// `/color <name>`: pick the chat color of your name.
pub struct ColorCommand {
    cache: Arc<RecordCache>,
}

impl ColorCommand {
    pub fn new(cache: Arc<RecordCache>) -> Self {
        Self { cache }
    }
}

impl CommandHandler for ColorCommand {
    fn prepare(&self, invocation: &Invocation<'_>, args: &[&str]) -> Result<CommandTask, ParseError> {
        let Some(player) = invocation.player() else {
            return Err(ValidationError::PlayersOnly);
        };
        validate_arg_count(args, 1)?;
        let Some(raw) = args.first() else {
            return Err(ValidationError::MissingArgument("/color <color>"));
        };
        let color: ChatColor = raw
            .parse()
            .map_err(|_| ValidationError::UnknownColor(raw.to_string()))?;

        let handle = player.handle();
        let cache = Arc::clone(&self.cache);
        Ok(Box::pin(async move {
            cache.mutate(handle.id, |r| r.chat_color = color).await?;
            Ok(
                Reply::info(format!("§aYour name color is now §{}{}§a.", color.code(), color))
                    .then(move |world| {
                        if let Some(player) = world.session_mut(handle) {
                            player.apply_color(color);
                        }
                    }),
            )
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreAction {
    Ignore,
    Unignore,
}

/// `/ignore <player>` and `/unignore <player>`.
pub struct IgnoreCommand {
    cache: Arc<RecordCache>,
    action: IgnoreAction,
}

impl IgnoreCommand {
    pub fn new(cache: Arc<RecordCache>, action: IgnoreAction) -> Self {
        Self { cache, action }
    }

    fn usage(&self) -> &'static str {
        match self.action {
            IgnoreAction::Ignore => "/ignore <player>",
            IgnoreAction::Unignore => "/unignore <player>",
        }
    }
}

impl CommandHandler for IgnoreCommand {
    fn prepare(&self, invocation: &Invocation<'_>, args: &[&str]) -> Result<CommandTask, ParseError> {
        let Some(player) = invocation.player() else {
            return Err(ValidationError::PlayersOnly);
        };
        validate_arg_count(args, 1)?;
        let Some(name) = args.first() else {
            return Err(ValidationError::MissingArgument(self.usage()));
        };
        if player.name().eq_ignore_ascii_case(name) {
            return Err(ValidationError::CannotTargetSelf);
        }
        let target = Target::lookup(invocation, name)?;

        let handle = player.handle();
        let action = self.action;
        let cache = Arc::clone(&self.cache);
        let shown = name.to_string();
        Ok(Box::pin(async move {
            let Some((target_id, _)) = target.resolve(&cache).await? else {
                return Ok(Reply::error(NEVER_JOINED));
            };
            if target_id == handle.id {
                return Ok(Reply::error("§cYou cannot ignore yourself."));
            }

            let record = cache
                .mutate(handle.id, |r| match action {
                    IgnoreAction::Ignore => {
                        r.ignored.insert(target_id);
                    }
                    IgnoreAction::Unignore => {
                        r.ignored.remove(&target_id);
                    }
                })
                .await?;

            let line = match action {
                IgnoreAction::Ignore => format!("§aYou are now ignoring §e{}§a.", shown),
                IgnoreAction::Unignore => format!("§aYou are no longer ignoring §e{}§a.", shown),
            };
            let ignored = record.ignored;
            Ok(Reply::info(line).then(move |world| {
                if let Some(player) = world.session_mut(handle) {
                    player.ignored = ignored;
                }
            }))
        }))
    }
}
