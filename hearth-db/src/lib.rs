mod error;
mod models;

pub use error::{DbError, Result};
pub use models::{ChatColor, PlayerId, PlayerName, PlayerRecord, UnknownColor};

use std::collections::BTreeSet;
use std::path::Path;
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::types::Type;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, params};
use tracing::{debug, info, warn};

/// Durable store for player records.
#[derive(Clone)]
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create a database at the given path.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = Connection::open(path).await.map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Create an in-memory database (useful for testing).
  pub async fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .await
      .map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  async fn initialize(&self) -> Result<()> {
    self.conn
            .call(|conn| {
                conn.pragma_update(None, "journal_mode", "WAL")?;
                conn.pragma_update(None, "foreign_keys", "ON")?;

                conn.execute_batch(
                    r#"
                    CREATE TABLE IF NOT EXISTS player_records (
                        id TEXT PRIMARY KEY,
                        name TEXT NOT NULL,
                        first_join INTEGER,
                        played_seconds INTEGER NOT NULL DEFAULT 0,
                        chat_color TEXT NOT NULL DEFAULT 'white'
                    );

                    CREATE TABLE IF NOT EXISTS ignored_players (
                        player_id TEXT NOT NULL REFERENCES player_records(id) ON DELETE CASCADE,
                        ignored_id TEXT NOT NULL,
                        PRIMARY KEY (player_id, ignored_id)
                    );

                    -- Name lookups are case-insensitive
                    CREATE INDEX IF NOT EXISTS idx_player_records_name
                        ON player_records(name COLLATE NOCASE);
                    "#,
                )?;
                Ok(())
            })
            .await?;

    info!("database initialized");
    Ok(())
  }

  /// Load a player record with its ignore list.
  /// Returns None if the player has no record.
  pub async fn read_player(&self, id: PlayerId) -> Result<Option<PlayerRecord>> {
    let record = self
      .conn
      .call(move |conn| {
        let key = id.to_string();

        let row = conn
          .prepare_cached(
            "SELECT name, first_join, played_seconds, chat_color FROM player_records WHERE id = ?1",
          )?
          .query_row(params![&key], |row| {
            Ok((
              row.get::<_, String>(0)?,
              row.get::<_, Option<i64>>(1)?,
              row.get::<_, i64>(2)?,
              row.get::<_, String>(3)?,
            ))
          })
          .optional()?;

        let Some((name, first_join, played_seconds, chat_color)) = row else {
          return Ok(None);
        };

        let ignored = conn
          .prepare_cached(
            "SELECT ignored_id FROM ignored_players WHERE player_id = ?1 ORDER BY ignored_id",
          )?
          .query_map(params![&key], |row| parse_id(0, row.get(0)?))?
          .collect::<rusqlite::Result<BTreeSet<PlayerId>>>()?;

        Ok(Some(PlayerRecord {
          id,
          name: parse_name(0, name)?,
          first_join,
          played_seconds: played_seconds.max(0) as u64,
          ignored,
          chat_color: parse_color(id, &chat_color),
        }))
      })
      .await?;

    Ok(record)
  }

  /// Insert or replace a player record and its ignore list in one transaction.
  /// An already stored `first_join` is never overwritten.
  pub async fn write_player(&self, record: PlayerRecord) -> Result<()> {
    let id = record.id;
    let ignored_count = record.ignored.len();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let key = record.id.to_string();
        let played_seconds = i64::try_from(record.played_seconds).unwrap_or(i64::MAX);

        tx.prepare_cached(
          r#"
          INSERT INTO player_records (id, name, first_join, played_seconds, chat_color)
          VALUES (?1, ?2, ?3, ?4, ?5)
          ON CONFLICT(id) DO UPDATE SET
              name = excluded.name,
              first_join = COALESCE(player_records.first_join, excluded.first_join),
              played_seconds = excluded.played_seconds,
              chat_color = excluded.chat_color
          "#,
        )?
        .execute(params![
          &key,
          record.name.as_str(),
          record.first_join,
          played_seconds,
          record.chat_color.name(),
        ])?;

        tx.prepare_cached("DELETE FROM ignored_players WHERE player_id = ?1")?
          .execute(params![&key])?;

        {
          let mut insert_stmt = tx.prepare_cached(
            "INSERT INTO ignored_players (player_id, ignored_id) VALUES (?1, ?2)",
          )?;
          for ignored in &record.ignored {
            insert_stmt.execute(params![&key, ignored.to_string()])?;
          }
        }

        tx.commit()?;
        Ok(())
      })
      .await?;

    debug!(player = %id, ignored_count, "wrote player record");
    Ok(())
  }

  /// Find the id of the player currently known by `name` (case-insensitive).
  pub async fn find_player_id(&self, name: String) -> Result<Option<PlayerId>> {
    let id = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            "SELECT id FROM player_records WHERE name = ?1 COLLATE NOCASE ORDER BY first_join IS NULL, first_join LIMIT 1",
          )?
          .query_row(params![&name], |row| parse_id(0, row.get(0)?))
          .optional()
      })
      .await?;

    Ok(id)
  }
}

fn parse_id(idx: usize, raw: String) -> rusqlite::Result<PlayerId> {
  raw
    .parse()
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_name(idx: usize, raw: String) -> rusqlite::Result<PlayerName> {
  PlayerName::from(raw.as_str()).map_err(|e| {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e.simplify()))
  })
}

/// An unknown stored color keeps the record readable and falls back to the default.
fn parse_color(id: PlayerId, raw: &str) -> ChatColor {
  raw.parse().unwrap_or_else(|e: UnknownColor| {
    warn!(player = %id, stored = raw, error = %e, "unknown stored chat color, using default");
    ChatColor::default()
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn now() -> i64 {
    1700000000 // Fixed timestamp for testing
  }

  fn record(name: &str) -> PlayerRecord {
    let mut record = PlayerRecord::blank(PlayerId::new());
    record.mark_joined(PlayerName::from(name).unwrap(), now());
    record
  }

  #[tokio::test]
  async fn test_missing_player_reads_none() {
    let db = Database::open_in_memory().await.unwrap();

    let record = db.read_player(PlayerId::new()).await.unwrap();
    assert!(record.is_none());
  }

  #[tokio::test]
  async fn test_player_record_lifecycle() {
    let db = Database::open_in_memory().await.unwrap();

    let mut steve = record("Steve");
    steve.played_seconds = 3600;
    steve.chat_color = ChatColor::Gold;
    steve.ignored.insert(PlayerId::new());
    steve.ignored.insert(PlayerId::new());

    db.write_player(steve.clone()).await.unwrap();

    let loaded = db.read_player(steve.id).await.unwrap().unwrap();
    assert_eq!(loaded, steve);

    // Shrinking the ignore list replaces the stored set
    let kept = *steve.ignored.iter().next().unwrap();
    steve.ignored.retain(|id| *id == kept);
    steve.played_seconds += 60;
    db.write_player(steve.clone()).await.unwrap();

    let loaded = db.read_player(steve.id).await.unwrap().unwrap();
    assert_eq!(loaded.ignored.len(), 1);
    assert!(loaded.ignored.contains(&kept));
    assert_eq!(loaded.played_seconds, 3660);
  }

  #[tokio::test]
  async fn test_first_join_is_never_overwritten() {
    let db = Database::open_in_memory().await.unwrap();

    let steve = record("Steve");
    db.write_player(steve.clone()).await.unwrap();

    let mut rewritten = steve.clone();
    rewritten.first_join = Some(now() + 9999);
    db.write_player(rewritten).await.unwrap();

    let mut cleared = steve.clone();
    cleared.first_join = None;
    db.write_player(cleared).await.unwrap();

    let loaded = db.read_player(steve.id).await.unwrap().unwrap();
    assert_eq!(loaded.first_join, Some(now()));
  }

  #[tokio::test]
  async fn test_record_without_join_keeps_null_timestamp() {
    let db = Database::open_in_memory().await.unwrap();

    let mut ghost = PlayerRecord::blank(PlayerId::new());
    ghost.name = PlayerName::from("Ghost").unwrap();
    db.write_player(ghost.clone()).await.unwrap();

    let loaded = db.read_player(ghost.id).await.unwrap().unwrap();
    assert!(!loaded.has_joined());
    assert_eq!(loaded.chat_color, ChatColor::White);
  }

  #[tokio::test]
  async fn test_find_player_id_is_case_insensitive() {
    let db = Database::open_in_memory().await.unwrap();

    let alex = record("Alex");
    db.write_player(alex.clone()).await.unwrap();

    assert_eq!(db.find_player_id("alex".to_string()).await.unwrap(), Some(alex.id));
    assert_eq!(db.find_player_id("ALEX".to_string()).await.unwrap(), Some(alex.id));
    assert!(db.find_player_id("Notch".to_string()).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_unknown_stored_color_reads_as_default() {
    let db = Database::open_in_memory().await.unwrap();

    let mut alex = record("Alex");
    alex.played_seconds = 42;
    alex.chat_color = ChatColor::Aqua;
    db.write_player(alex.clone()).await.unwrap();

    let key = alex.id.to_string();
    db.conn
      .call(move |conn| {
        conn.execute(
          "UPDATE player_records SET chat_color = 'sparkly' WHERE id = ?1",
          params![&key],
        )?;
        Ok::<(), rusqlite::Error>(())
      })
      .await
      .unwrap();

    let loaded = db.read_player(alex.id).await.unwrap().unwrap();
    assert_eq!(loaded.chat_color, ChatColor::default());
    assert_eq!(loaded.played_seconds, 42);
    assert_eq!(loaded.name, alex.name);
  }
}
