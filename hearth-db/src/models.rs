use arrayvec::ArrayString;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Player account name - max 16 characters, stored inline (no heap allocation).
pub type PlayerName = ArrayString<16>;

/// Stable identifier of a player account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlayerId(Uuid);

impl PlayerId {
  pub fn new() -> Self {
    Self(Uuid::new_v4())
  }

  pub fn from_uuid(uuid: Uuid) -> Self {
    Self(uuid)
  }

  pub fn as_uuid(&self) -> &Uuid {
    &self.0
  }
}

impl Default for PlayerId {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for PlayerId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.0.fmt(f)
  }
}

impl FromStr for PlayerId {
  type Err = uuid::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Uuid::parse_str(s).map(Self)
  }
}

/// Name color picked by the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChatColor {
  Black,
  DarkBlue,
  DarkGreen,
  DarkAqua,
  DarkRed,
  DarkPurple,
  Gold,
  Gray,
  DarkGray,
  Blue,
  Green,
  Aqua,
  Red,
  LightPurple,
  Yellow,
  #[default]
  White,
}

impl ChatColor {
  pub const ALL: [ChatColor; 16] = [
    ChatColor::Black,
    ChatColor::DarkBlue,
    ChatColor::DarkGreen,
    ChatColor::DarkAqua,
    ChatColor::DarkRed,
    ChatColor::DarkPurple,
    ChatColor::Gold,
    ChatColor::Gray,
    ChatColor::DarkGray,
    ChatColor::Blue,
    ChatColor::Green,
    ChatColor::Aqua,
    ChatColor::Red,
    ChatColor::LightPurple,
    ChatColor::Yellow,
    ChatColor::White,
  ];

  /// Formatting code character that follows `§`.
  pub fn code(self) -> char {
    match self {
      ChatColor::Black => '0',
      ChatColor::DarkBlue => '1',
      ChatColor::DarkGreen => '2',
      ChatColor::DarkAqua => '3',
      ChatColor::DarkRed => '4',
      ChatColor::DarkPurple => '5',
      ChatColor::Gold => '6',
      ChatColor::Gray => '7',
      ChatColor::DarkGray => '8',
      ChatColor::Blue => '9',
      ChatColor::Green => 'a',
      ChatColor::Aqua => 'b',
      ChatColor::Red => 'c',
      ChatColor::LightPurple => 'd',
      ChatColor::Yellow => 'e',
      ChatColor::White => 'f',
    }
  }

  /// Name used in commands and in the database.
  pub fn name(self) -> &'static str {
    match self {
      ChatColor::Black => "black",
      ChatColor::DarkBlue => "dark_blue",
      ChatColor::DarkGreen => "dark_green",
      ChatColor::DarkAqua => "dark_aqua",
      ChatColor::DarkRed => "dark_red",
      ChatColor::DarkPurple => "dark_purple",
      ChatColor::Gold => "gold",
      ChatColor::Gray => "gray",
      ChatColor::DarkGray => "dark_gray",
      ChatColor::Blue => "blue",
      ChatColor::Green => "green",
      ChatColor::Aqua => "aqua",
      ChatColor::Red => "red",
      ChatColor::LightPurple => "light_purple",
      ChatColor::Yellow => "yellow",
      ChatColor::White => "white",
    }
  }
}

impl fmt::Display for ChatColor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown chat color '{0}'")]
pub struct UnknownColor(pub String);

impl FromStr for ChatColor {
  type Err = UnknownColor;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    ChatColor::ALL
      .into_iter()
      .find(|c| c.name().eq_ignore_ascii_case(s))
      .ok_or_else(|| UnknownColor(s.to_string()))
  }
}

/// Durable per-player data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
  pub id: PlayerId,
  /// Last known account name
  pub name: PlayerName,
  /// Unix timestamp of the first completed join; None means "never joined".
  /// Once set it never changes.
  pub first_join: Option<i64>,
  pub played_seconds: u64,
  pub ignored: BTreeSet<PlayerId>,
  pub chat_color: ChatColor,
}

impl PlayerRecord {
  /// A record that has never been persisted.
  pub fn blank(id: PlayerId) -> Self {
    Self {
      id,
      name: PlayerName::new(),
      first_join: None,
      played_seconds: 0,
      ignored: BTreeSet::new(),
      chat_color: ChatColor::default(),
    }
  }

  /// Record a join. Only the first call sets `first_join`.
  pub fn mark_joined(&mut self, name: PlayerName, now: i64) {
    self.name = name;
    self.first_join.get_or_insert(now);
  }

  pub fn has_joined(&self) -> bool {
    self.first_join.is_some()
  }
}
