//! Connection event pipeline.
//!
//! A join fans out three loads for the player (join history, ignore list,
//! chat color) and fans back in to one main-thread continuation. That
//! continuation is skipped when the joining session is gone by the time the
//! loads finish; the loaded records stay cached either way.

use hearth_db::{ChatColor, PlayerId, PlayerName};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::RecordCache;
use crate::helpers::{now, translate_color_codes};
use crate::scheduler::MainHandle;
use crate::world::{JoinPhase, PlayerHandle, Sound, World};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Data applied and join messages sent.
    Ready,
    /// The session ended before its data arrived.
    Disconnected,
}

/// What a join needs from the player's record. Each part falls back to its
/// default independently when its load fails.
struct JoinData {
    ignored: BTreeSet<PlayerId>,
    color: ChatColor,
}

pub struct JoinPipeline {
    cache: Arc<RecordCache>,
    main: MainHandle,
    welcome: Arc<[String]>,
}

impl JoinPipeline {
    pub fn new(cache: Arc<RecordCache>, main: MainHandle, welcome: Vec<String>) -> Self {
        let welcome: Vec<String> = welcome.iter().map(|line| translate_color_codes(line)).collect();
        Self {
            cache,
            main,
            welcome: welcome.into(),
        }
    }

    pub fn welcome(&self) -> &[String] {
        &self.welcome
    }

    /// Register the connection and start loading its data. Main thread only.
    ///
    /// The returned task resolves once the continuation ran (or was skipped).
    pub fn on_connect(
        &self,
        world: &mut World,
        id: PlayerId,
        name: PlayerName,
    ) -> (PlayerHandle, JoinHandle<JoinOutcome>) {
        let handle = world.connect(id, name);
        self.cache.mark_online(id);
        if let Some(player) = world.session_mut(handle) {
            player.phase = JoinPhase::Loading;
        }

        let cache = Arc::clone(&self.cache);
        let main = self.main.clone();
        let welcome = Arc::clone(&self.welcome);
        let task = tokio::spawn(async move {
            let data = load(&cache, id, name).await;

            let (tx, rx) = oneshot::channel();
            main.run_on_main(move |world| {
                let _ = tx.send(finish_join(world, handle, data, &welcome));
            });
            // A dropped sender means the main loop stopped
            rx.await.unwrap_or(JoinOutcome::Disconnected)
        });
        (handle, task)
    }

    /// Tell the cache the player left and write their unflushed playtime.
    /// The session must already be removed from the world.
    pub fn on_disconnect(&self, id: PlayerId, pending_seconds: u64) -> JoinHandle<()> {
        self.cache.mark_offline(id);
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            flush_playtime(&cache, id, pending_seconds).await;
            cache.evict_if_idle(id).await;
        })
    }

    /// Write playtime of a session that was replaced by a new connection.
    pub fn on_replaced(&self, id: PlayerId, pending_seconds: u64) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move { flush_playtime(&cache, id, pending_seconds).await })
    }
}

async fn flush_playtime(cache: &RecordCache, id: PlayerId, seconds: u64) {
    if seconds == 0 {
        return;
    }
    if let Err(err) = cache.mutate(id, |r| r.played_seconds += seconds).await {
        warn!(player = %id, seconds, error = %err, "failed to flush playtime");
    }
}

async fn load(cache: &RecordCache, id: PlayerId, name: PlayerName) -> JoinData {
    let (history, ignored, color) = tokio::join!(
        cache.mutate(id, move |r| r.mark_joined(name, now())),
        cache.get(id),
        cache.get(id),
    );

    match history {
        Ok(record) => debug!(player = %id, first_join = ?record.first_join, "join recorded"),
        Err(err) => warn!(player = %id, error = %err, "failed to record join"),
    }
    let ignored = ignored
        .map(|r| r.map(|r| r.ignored).unwrap_or_default())
        .unwrap_or_else(|err| {
            warn!(player = %id, error = %err, "failed to load ignore list, using empty list");
            BTreeSet::new()
        });
    let color = color
        .map(|r| r.map(|r| r.chat_color).unwrap_or_default())
        .unwrap_or_else(|err| {
            warn!(player = %id, error = %err, "failed to load chat color, using default");
            ChatColor::default()
        });

    JoinData { ignored, color }
}

fn finish_join(world: &mut World, handle: PlayerHandle, data: JoinData, welcome: &[String]) -> JoinOutcome {
    let Some(player) = world.session_mut(handle) else {
        debug!(player = %handle.id, "player left before join data loaded");
        return JoinOutcome::Disconnected;
    };
    player.apply_color(data.color);
    player.ignored = data.ignored;
    player.phase = JoinPhase::Ready;
    let display_name = player.display_name().to_string();

    world.broadcast(format!("§8[§a+§8] {} §7joined", display_name));
    if !welcome.is_empty() {
        world.play_sound(handle.id, Sound::PlayerLevelUp);
        for line in welcome {
            world.send_message(handle.id, line.clone());
        }
    }
    info!(player = %handle.id, "join complete");
    JoinOutcome::Ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{MainQueue, main_channel};
    use crate::store::MockPlayerStore;
    use crate::world::Outbound;
    use hearth_db::{DbError, PlayerRecord};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn setup(
        store: MockPlayerStore,
        welcome: &[&str],
    ) -> (JoinPipeline, MainQueue, World, UnboundedReceiver<Outbound>) {
        let (main, queue) = main_channel();
        let (tx, rx) = mpsc::unbounded_channel();
        let cache = Arc::new(RecordCache::new(Arc::new(store)));
        let welcome = welcome.iter().map(|s| s.to_string()).collect();
        (JoinPipeline::new(cache, main, welcome), queue, World::new(tx), rx)
    }

    async fn drive(queue: &mut MainQueue, world: &mut World, task: &JoinHandle<JoinOutcome>) {
        for _ in 0..100 {
            if task.is_finished() {
                return;
            }
            tokio::task::yield_now().await;
            queue.drain(world);
        }
        panic!("join never finished");
    }

    #[test]
    fn test_welcome_codes_translated_once() {
        let (main, _queue) = main_channel();
        let cache = Arc::new(RecordCache::new(Arc::new(MockPlayerStore::new())));
        let pipeline = JoinPipeline::new(cache, main, vec!["&aWelcome &lhome".to_string()]);
        assert_eq!(pipeline.welcome(), ["§aWelcome §lhome".to_string()]);
    }

    #[tokio::test]
    async fn test_color_load_failure_falls_back_to_defaults() {
        let id = PlayerId::new();
        let mut store = MockPlayerStore::new();
        store.expect_read().returning(|_| {
            Err(DbError::Connection(tokio_rusqlite::Error::ConnectionClosed))
        });

        let (pipeline, mut queue, mut world, mut rx) = setup(store, &[]);
        let (handle, task) = pipeline.on_connect(&mut world, id, PlayerName::from("Steve").unwrap());
        drive(&mut queue, &mut world, &task).await;

        assert_eq!(task.await.unwrap(), JoinOutcome::Ready);
        let player = world.session(handle).unwrap();
        assert_eq!(player.display_name(), "§fSteve§r");
        assert!(player.ignored.is_empty());
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Broadcast {
                text: "§8[§a+§8] §fSteve§r §7joined".to_string()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_loaded_preferences_are_applied() {
        let id = PlayerId::new();
        let blocked = PlayerId::new();
        let mut existing = PlayerRecord::blank(id);
        existing.mark_joined(PlayerName::from("Steve").unwrap(), 1_700_000_000);
        existing.chat_color = ChatColor::Gold;
        existing.ignored.insert(blocked);

        let mut store = MockPlayerStore::new();
        store
            .expect_read()
            .times(1)
            .returning(move |_| Ok(Some(existing.clone())));
        store
            .expect_write()
            .withf(|r| r.first_join == Some(1_700_000_000))
            .returning(|_| Ok(()));

        let (pipeline, mut queue, mut world, _rx) = setup(store, &["hi"]);
        let (handle, task) = pipeline.on_connect(&mut world, id, PlayerName::from("Steve").unwrap());
        assert_eq!(world.session(handle).unwrap().phase, JoinPhase::Loading);
        drive(&mut queue, &mut world, &task).await;

        let player = world.session(handle).unwrap();
        assert_eq!(player.phase, JoinPhase::Ready);
        assert_eq!(player.display_name(), "§6Steve§r");
        assert!(player.ignored.contains(&blocked));
    }
}
