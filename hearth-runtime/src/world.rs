//! Live game-entity state. Owned by the main thread only.

use hearth_db::{ChatColor, PlayerId, PlayerName};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

/// One connection of a player. A reconnect gets a new session number, so a
/// continuation captured for an old connection never touches the new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlayerHandle {
    pub id: PlayerId,
    pub session: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPhase {
    Connecting,
    Loading,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sound {
    PlayerLevelUp,
}

/// Effects for the network layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message { to: PlayerId, text: String },
    Sound { to: PlayerId, sound: Sound, volume: f32, pitch: f32 },
    Broadcast { text: String },
    Console { text: String },
}

#[derive(Debug)]
pub struct OnlinePlayer {
    handle: PlayerHandle,
    name: PlayerName,
    display_name: String,
    pub phase: JoinPhase,
    pub ignored: BTreeSet<PlayerId>,
    /// Ticks played that have not been written to the store yet.
    pub pending_ticks: u64,
}

impl OnlinePlayer {
    pub fn handle(&self) -> PlayerHandle {
        self.handle
    }

    pub fn id(&self) -> PlayerId {
        self.handle.id
    }

    pub fn name(&self) -> PlayerName {
        self.name
    }

    /// Name as currently shown in chat, including formatting codes.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn set_display_name(&mut self, display_name: impl Into<String>) {
        self.display_name = display_name.into();
    }

    pub fn apply_color(&mut self, color: ChatColor) {
        self.display_name = format!("§{}{}§r", color.code(), self.name);
    }
}

pub struct World {
    players: HashMap<PlayerId, OnlinePlayer>,
    next_session: u64,
    tick: u64,
    egress: UnboundedSender<Outbound>,
}

impl World {
    pub fn new(egress: UnboundedSender<Outbound>) -> Self {
        Self {
            players: HashMap::new(),
            next_session: 1,
            tick: 0,
            egress,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub(crate) fn advance(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Register a new connection. A still-registered older session of the
    /// same player is replaced.
    pub fn connect(&mut self, id: PlayerId, name: PlayerName) -> PlayerHandle {
        let handle = PlayerHandle {
            id,
            session: self.next_session,
        };
        self.next_session += 1;

        let previous = self.players.insert(
            id,
            OnlinePlayer {
                handle,
                name,
                display_name: name.to_string(),
                phase: JoinPhase::Connecting,
                ignored: BTreeSet::new(),
                pending_ticks: 0,
            },
        );
        if previous.is_some() {
            debug!(player = %id, "replaced stale session");
        }
        info!(player = %id, %name, session = handle.session, "player connected");
        handle
    }

    pub fn disconnect(&mut self, id: PlayerId) -> Option<OnlinePlayer> {
        let player = self.players.remove(&id)?;
        info!(player = %id, name = %player.name, "player disconnected");
        Some(player)
    }

    pub fn player(&self, id: PlayerId) -> Option<&OnlinePlayer> {
        self.players.get(&id)
    }

    /// The player behind `handle`, if that exact session is still connected.
    pub fn session(&self, handle: PlayerHandle) -> Option<&OnlinePlayer> {
        self.players
            .get(&handle.id)
            .filter(|p| p.handle.session == handle.session)
    }

    pub fn session_mut(&mut self, handle: PlayerHandle) -> Option<&mut OnlinePlayer> {
        self.players
            .get_mut(&handle.id)
            .filter(|p| p.handle.session == handle.session)
    }

    pub fn is_connected(&self, handle: PlayerHandle) -> bool {
        self.session(handle).is_some()
    }

    /// Case-insensitive lookup among connected players.
    pub fn find_by_name(&self, name: &str) -> Option<&OnlinePlayer> {
        self.players
            .values()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn online_count(&self) -> usize {
        self.players.len()
    }

    pub fn online_mut(&mut self) -> impl Iterator<Item = &mut OnlinePlayer> {
        self.players.values_mut()
    }

    pub fn send_message(&self, to: PlayerId, text: impl Into<String>) {
        self.emit(Outbound::Message {
            to,
            text: text.into(),
        });
    }

    pub fn play_sound(&self, to: PlayerId, sound: Sound) {
        self.emit(Outbound::Sound {
            to,
            sound,
            volume: 1.0,
            pitch: 1.0,
        });
    }

    pub fn broadcast(&self, text: impl Into<String>) {
        self.emit(Outbound::Broadcast { text: text.into() });
    }

    pub fn console(&self, text: impl Into<String>) {
        self.emit(Outbound::Console { text: text.into() });
    }

    fn emit(&self, outbound: Outbound) {
        // No receiver means no network layer is attached
        let _ = self.egress.send(outbound);
    }
}
