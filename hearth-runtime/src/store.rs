//! Storage port used by the record cache.
//!
//! The cache only ever talks to this trait, so tests can swap the SQLite
//! database for mocks or in-memory doubles.

use async_trait::async_trait;
use hearth_db::{Database, DbError, PlayerId, PlayerRecord};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlayerStore: Send + Sync {
    /// Load a record. `Ok(None)` means the player has no record.
    async fn read(&self, id: PlayerId) -> Result<Option<PlayerRecord>, DbError>;
    /// Durably persist a record. Returns only after the write is acknowledged.
    async fn write(&self, record: &PlayerRecord) -> Result<(), DbError>;
    /// Case-insensitive lookup of the player currently known by `name`.
    async fn find_by_name(&self, name: &str) -> Result<Option<PlayerId>, DbError>;
}

#[async_trait]
impl PlayerStore for Database {
    async fn read(&self, id: PlayerId) -> Result<Option<PlayerRecord>, DbError> {
        self.read_player(id).await
    }

    async fn write(&self, record: &PlayerRecord) -> Result<(), DbError> {
        self.write_player(record.clone()).await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<PlayerId>, DbError> {
        self.find_player_id(name.to_string()).await
    }
}
