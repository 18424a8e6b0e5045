//! Command dispatch.
//!
//! A command has two halves. `prepare` runs synchronously on the main thread:
//! it validates arguments and copies whatever live state the command needs
//! (ids, names). It returns a future that runs as a tokio task and may await
//! the record cache. The reply goes back through the main-thread queue and is
//! dropped if the invoking player is gone by then.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{CommandError, ParseError};
use crate::scheduler::MainHandle;
use crate::world::{OnlinePlayer, PlayerHandle, World};

pub type CommandTask = Pin<Box<dyn Future<Output = Result<Reply, CommandError>> + Send + 'static>>;

type Effect = Box<dyn FnOnce(&mut World) + Send + 'static>;

/// Who ran a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invoker {
    Player(PlayerHandle),
    Console,
}

/// Response line for the invoker, plus an optional main-thread effect.
pub struct Reply {
    line: String,
    effect: Option<Effect>,
}

impl Reply {
    pub fn info(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            effect: None,
        }
    }

    pub fn error(line: impl Into<String>) -> Self {
        Self::info(line)
    }

    /// Run `effect` on the main thread right before the line is delivered.
    pub fn then<F>(mut self, effect: F) -> Self
    where
        F: FnOnce(&mut World) + Send + 'static,
    {
        self.effect = Some(Box::new(effect));
        self
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    fn deliver(self, world: &mut World, invoker: Invoker) {
        if let Some(effect) = self.effect {
            effect(world);
        }
        match invoker {
            Invoker::Player(player) => world.send_message(player.id, self.line),
            Invoker::Console => world.console(self.line),
        }
    }

    /// Deliver synchronously, for replies produced on the main thread.
    fn deliver_now(self, world: &World, invoker: Invoker) {
        match invoker {
            Invoker::Player(player) => world.send_message(player.id, self.line),
            Invoker::Console => world.console(self.line),
        }
    }
}

/// What `prepare` gets to look at. Only valid during the synchronous half.
pub struct Invocation<'a> {
    pub world: &'a World,
    pub invoker: Invoker,
}

impl<'a> Invocation<'a> {
    /// The invoking player, if a player ran the command.
    pub fn player(&self) -> Option<&'a OnlinePlayer> {
        match self.invoker {
            Invoker::Player(handle) => self.world.session(handle),
            Invoker::Console => None,
        }
    }
}

pub trait CommandHandler: Send + Sync {
    fn prepare(&self, invocation: &Invocation<'_>, args: &[&str]) -> Result<CommandTask, ParseError>;
}

impl<F> CommandHandler for F
where
    F: Fn(&Invocation<'_>, &[&str]) -> Result<CommandTask, ParseError> + Send + Sync,
{
    fn prepare(&self, invocation: &Invocation<'_>, args: &[&str]) -> Result<CommandTask, ParseError> {
        self(invocation, args)
    }
}

pub struct Dispatcher {
    main: MainHandle,
    /// Keyed by lowercased name.
    commands: HashMap<String, (&'static str, Arc<dyn CommandHandler>)>,
}

impl Dispatcher {
    pub fn new(main: MainHandle) -> Self {
        Self {
            main,
            commands: HashMap::new(),
        }
    }

    /// Register `handler` under `name` (case-insensitive, without the slash).
    pub fn register<H>(&mut self, name: &'static str, handler: H) -> &mut Self
    where
        H: CommandHandler + 'static,
    {
        let key = name.to_ascii_lowercase();
        if self.commands.insert(key, (name, Arc::new(handler))).is_some() {
            debug!(command = name, "replaced command handler");
        }
        self
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    fn lookup(&self, name: &str) -> Option<(&'static str, &Arc<dyn CommandHandler>)> {
        self.commands
            .get(&name.to_ascii_lowercase())
            .map(|(registered, handler)| (*registered, handler))
    }

    /// Handle one command line. Must be called on the main thread.
    ///
    /// Unknown commands and argument errors are answered immediately; nothing
    /// is spawned for them.
    pub fn dispatch(&self, world: &World, invoker: Invoker, line: &str) {
        if let Invoker::Player(player) = invoker {
            if !world.is_connected(player) {
                debug!(player = %player.id, "command from departed session ignored");
                return;
            }
        }

        let mut parts = line.trim().trim_start_matches('/').split_whitespace();
        let Some(name) = parts.next() else {
            return;
        };
        let args: Vec<&str> = parts.collect();

        let Some((command, handler)) = self.lookup(name) else {
            Reply::error(format!("§cUnknown command '{}'.", name)).deliver_now(world, invoker);
            return;
        };

        let invocation = Invocation { world, invoker };
        let task = match handler.prepare(&invocation, &args) {
            Ok(task) => task,
            Err(err) => {
                debug!(command, error = %err, "command rejected");
                Reply::error(format!("§c{}", err)).deliver_now(world, invoker);
                return;
            }
        };

        info!(command, invoker = ?invoker, "executing command");
        let main = self.main.clone();
        tokio::spawn(async move {
            let reply = match task.await {
                Ok(reply) => reply,
                Err(err) => err.into_reply(command),
            };
            debug!(command, "command finished");
            match invoker {
                Invoker::Player(player) => {
                    main.run_for(player, move |world| reply.deliver(world, invoker))
                }
                Invoker::Console => main.run_on_main(move |world| reply.deliver(world, invoker)),
            }
        });
    }
}
