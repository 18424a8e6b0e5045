use async_trait::async_trait;
use hearth_db::{Database, DbError, PlayerId, PlayerName, PlayerRecord};
use hearth_runtime::commands::{NEVER_JOINED, register_defaults};
use hearth_runtime::{
    Dispatcher, Invoker, JoinOutcome, JoinPipeline, MainQueue, Outbound, PlayerStore, RecordCache,
    World, main_channel,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// In-memory store whose reads block until the gate opens.
struct GatedStore {
    records: Mutex<HashMap<PlayerId, PlayerRecord>>,
    reads: AtomicUsize,
    gate: watch::Sender<bool>,
}

impl GatedStore {
    fn closed() -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(HashMap::new()),
            reads: AtomicUsize::new(0),
            gate: watch::channel(false).0,
        })
    }

    fn insert(&self, record: PlayerRecord) {
        self.records.lock().unwrap().insert(record.id, record);
    }

    fn open(&self) {
        self.gate.send_replace(true);
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn stored(&self, id: PlayerId) -> Option<PlayerRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl PlayerStore for GatedStore {
    async fn read(&self, id: PlayerId) -> Result<Option<PlayerRecord>, DbError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        Ok(self.stored(id))
    }

    async fn write(&self, record: &PlayerRecord) -> Result<(), DbError> {
        self.insert(record.clone());
        Ok(())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<PlayerId>, DbError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .map(|r| r.id))
    }
}

fn name(raw: &str) -> PlayerName {
    PlayerName::from(raw).unwrap()
}

fn world() -> (World, UnboundedReceiver<Outbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (World::new(tx), rx)
}

fn outbound(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
    let mut out = Vec::new();
    while let Ok(o) = rx.try_recv() {
        out.push(o);
    }
    out
}

/// Keep the main queue moving until the join task resolves.
async fn finish_join(
    queue: &mut MainQueue,
    world: &mut World,
    join: JoinHandle<JoinOutcome>,
) -> JoinOutcome {
    for _ in 0..400 {
        if join.is_finished() {
            return join.await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        queue.drain(world);
    }
    panic!("join never finished");
}

/// Keep the main queue moving until something is sent to the network layer.
async fn next_outbound(
    queue: &mut MainQueue,
    world: &mut World,
    rx: &mut UnboundedReceiver<Outbound>,
) -> Outbound {
    for _ in 0..400 {
        if let Ok(o) = rx.try_recv() {
            return o;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        queue.drain(world);
    }
    panic!("nothing was sent");
}

async fn sqlite_cache() -> (Database, Arc<RecordCache>) {
    let db = Database::open_in_memory()
        .await
        .expect("Failed to create in-memory database");
    let cache = Arc::new(RecordCache::new(Arc::new(db.clone())));
    (db, cache)
}

// =============================================================================
// CACHE TESTS
// =============================================================================

#[tokio::test]
async fn test_concurrent_gets_share_one_store_read() {
    // GIVEN: A stored record behind a closed gate
    let store = GatedStore::closed();
    let id = PlayerId::new();
    let mut record = PlayerRecord::blank(id);
    record.mark_joined(name("Steve"), 1_700_000_000);
    store.insert(record.clone());
    let cache = Arc::new(RecordCache::new(store.clone()));

    // WHEN: Eight callers ask for it before the load resolves
    let callers: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get(id).await })
        })
        .collect();
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert_eq!(store.reads(), 1);
    store.open();

    // THEN: Everyone gets the same record from a single read
    for caller in callers {
        assert_eq!(caller.await.unwrap().unwrap(), Some(record.clone()));
    }
    assert_eq!(store.reads(), 1);
    assert_eq!(cache.store_reads(), 1);
}

#[tokio::test]
async fn test_sequential_mutations_fold_in_order() {
    // GIVEN: A cache over SQLite
    let (db, cache) = sqlite_cache().await;
    let id = PlayerId::new();

    // WHEN: Applying digit-appending mutations one after another
    for digit in 1..=5 {
        cache
            .mutate(id, move |r| r.played_seconds = r.played_seconds * 10 + digit)
            .await
            .unwrap();
    }

    // THEN: Both the cache and the store saw them in call order
    assert_eq!(cache.get(id).await.unwrap().unwrap().played_seconds, 12345);
    assert_eq!(db.read_player(id).await.unwrap().unwrap().played_seconds, 12345);
}

#[tokio::test]
async fn test_concurrent_mutations_lose_no_update() {
    // GIVEN: A cache over SQLite
    let (db, cache) = sqlite_cache().await;
    let id = PlayerId::new();

    // WHEN: Twenty tasks increment the same record at once
    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.mutate(id, |r| r.played_seconds += 1).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    // THEN: Every increment is persisted
    assert_eq!(cache.get(id).await.unwrap().unwrap().played_seconds, 20);
    assert_eq!(db.read_player(id).await.unwrap().unwrap().played_seconds, 20);
    assert_eq!(cache.store_reads(), 1);
}

#[tokio::test]
async fn test_concurrent_mutations_apply_in_issue_order() {
    // GIVEN: A closed gate so the first mutation is stuck loading
    let store = GatedStore::closed();
    let id = PlayerId::new();
    let cache = Arc::new(RecordCache::new(store.clone()));

    // WHEN: Digit-appending mutations are issued one after another while it waits
    let mut tasks = Vec::new();
    for digit in 1..=5 {
        let cache = Arc::clone(&cache);
        tasks.push(tokio::spawn(async move {
            cache
                .mutate(id, move |r| r.played_seconds = r.played_seconds * 10 + digit)
                .await
        }));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }
    assert_eq!(store.reads(), 1);
    store.open();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    // THEN: The persisted value is the fold in issue order
    assert_eq!(store.stored(id).unwrap().played_seconds, 12345);
    assert_eq!(cache.get(id).await.unwrap().unwrap().played_seconds, 12345);
    assert_eq!(store.reads(), 1);
}

#[tokio::test]
async fn test_unpaired_release_cannot_evict_a_loading_entry() {
    // GIVEN: A get waiting on a closed gate
    let store = GatedStore::closed();
    let id = PlayerId::new();
    let mut record = PlayerRecord::blank(id);
    record.mark_joined(name("Alex"), 1_700_000_000);
    store.insert(record.clone());
    let cache = Arc::new(RecordCache::new(store.clone()));

    let first = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get(id).await })
    };
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert_eq!(store.reads(), 1);

    // WHEN: A release with no matching retain arrives, then another get
    cache.release(id).await;
    assert_eq!(cache.len(), 1);

    let second = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get(id).await })
    };
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert_eq!(store.reads(), 1);
    store.open();

    // THEN: Both callers share the one in-flight load
    assert_eq!(first.await.unwrap().unwrap(), Some(record.clone()));
    assert_eq!(second.await.unwrap().unwrap(), Some(record));
    assert_eq!(store.reads(), 1);
}

// =============================================================================
// JOIN PIPELINE TESTS
// =============================================================================

#[tokio::test]
async fn test_disconnect_before_loads_finish_suppresses_continuation() {
    // GIVEN: A joining player whose loads are stuck behind the gate
    let store = GatedStore::closed();
    let cache = Arc::new(RecordCache::new(store.clone()));
    let (main, mut queue) = main_channel();
    let (mut world, mut rx) = world();
    let pipeline = JoinPipeline::new(Arc::clone(&cache), main, vec!["Welcome!".to_string()]);
    let id = PlayerId::new();

    let (_handle, join) = pipeline.on_connect(&mut world, id, name("Steve"));
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }

    // WHEN: The player leaves, then the loads complete
    world.disconnect(id);
    let left = pipeline.on_disconnect(id, 0);
    left.await.unwrap();
    store.open();

    // THEN: No join messages, but the loads still populated the cache
    assert_eq!(finish_join(&mut queue, &mut world, join).await, JoinOutcome::Disconnected);
    assert!(outbound(&mut rx).is_empty());
    assert_eq!(store.reads(), 1);
    assert_eq!(cache.len(), 1);
    assert!(store.stored(id).unwrap().has_joined());

    // A later lookup is served from the cache
    assert!(cache.get(id).await.unwrap().unwrap().has_joined());
    assert_eq!(store.reads(), 1);

    // The next sweep drops the orphaned entry
    assert_eq!(cache.sweep().await, 1);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_empty_welcome_list_sends_only_broadcast() {
    // GIVEN: A pipeline without welcome lines
    let (_db, cache) = sqlite_cache().await;
    let (main, mut queue) = main_channel();
    let (mut world, mut rx) = world();
    let pipeline = JoinPipeline::new(cache, main, Vec::new());
    let id = PlayerId::new();

    // WHEN: A player joins
    let (_handle, join) = pipeline.on_connect(&mut world, id, name("Steve"));
    assert_eq!(finish_join(&mut queue, &mut world, join).await, JoinOutcome::Ready);

    // THEN: Only the join broadcast goes out, no sound
    assert_eq!(
        outbound(&mut rx),
        vec![Outbound::Broadcast {
            text: "§8[§a+§8] §fSteve§r §7joined".to_string()
        }]
    );
}

#[tokio::test]
async fn test_welcome_lines_follow_one_sound_in_order() {
    // GIVEN: A pipeline with two welcome lines
    let (_db, cache) = sqlite_cache().await;
    let (main, mut queue) = main_channel();
    let (mut world, mut rx) = world();
    let pipeline = JoinPipeline::new(
        cache,
        main,
        vec!["&aWelcome back!".to_string(), "Type /playtime".to_string()],
    );
    let id = PlayerId::new();

    // WHEN: A player joins
    let (_handle, join) = pipeline.on_connect(&mut world, id, name("Steve"));
    assert_eq!(finish_join(&mut queue, &mut world, join).await, JoinOutcome::Ready);

    // THEN: Broadcast, exactly one sound, then each line once in order
    let out = outbound(&mut rx);
    assert_eq!(out.len(), 4);
    assert!(matches!(out[0], Outbound::Broadcast { .. }));
    assert!(matches!(out[1], Outbound::Sound { to, .. } if to == id));
    assert_eq!(
        out[2],
        Outbound::Message {
            to: id,
            text: "§aWelcome back!".to_string()
        }
    );
    assert_eq!(
        out[3],
        Outbound::Message {
            to: id,
            text: "Type /playtime".to_string()
        }
    );
}

#[tokio::test]
async fn test_rejoin_keeps_first_join() {
    // GIVEN: A player who joined before
    let (db, cache) = sqlite_cache().await;
    let id = PlayerId::new();
    let mut earlier = PlayerRecord::blank(id);
    earlier.mark_joined(name("Steve"), 1_600_000_000);
    db.write_player(earlier).await.unwrap();

    let (main, mut queue) = main_channel();
    let (mut world, _rx) = world();
    let pipeline = JoinPipeline::new(cache, main, Vec::new());

    // WHEN: They join again under a new name
    let (_handle, join) = pipeline.on_connect(&mut world, id, name("Steven"));
    finish_join(&mut queue, &mut world, join).await;

    // THEN: The name is updated, the first join is not
    let stored = db.read_player(id).await.unwrap().unwrap();
    assert_eq!(stored.name.as_str(), "Steven");
    assert_eq!(stored.first_join, Some(1_600_000_000));
}

// =============================================================================
// PLAYTIME COMMAND TESTS
// =============================================================================

#[tokio::test]
async fn test_playtime_unknown_and_never_joined_look_the_same() {
    // GIVEN: A stored record that never completed a join
    let (db, cache) = sqlite_cache().await;
    let mut ghost = PlayerRecord::blank(PlayerId::new());
    ghost.name = name("Ghost");
    db.write_player(ghost).await.unwrap();

    let (main, mut queue) = main_channel();
    let (mut world, mut rx) = world();
    let mut dispatcher = Dispatcher::new(main);
    register_defaults(&mut dispatcher, &cache);

    // WHEN: Asking for the ghost and for a name nobody has
    dispatcher.dispatch(&world, Invoker::Console, "/playtime Ghost");
    let ghost_reply = next_outbound(&mut queue, &mut world, &mut rx).await;
    dispatcher.dispatch(&world, Invoker::Console, "/playtime Nobody");
    let unknown_reply = next_outbound(&mut queue, &mut world, &mut rx).await;

    // THEN: Both get the same line
    let expected = Outbound::Console {
        text: NEVER_JOINED.to_string(),
    };
    assert_eq!(ghost_reply, expected);
    assert_eq!(unknown_reply, expected);
}

#[tokio::test]
async fn test_playtime_for_self_uses_captured_identity() {
    // GIVEN: A joined player who played an hour
    let (db, cache) = sqlite_cache().await;
    let id = PlayerId::new();
    let mut record = PlayerRecord::blank(id);
    record.mark_joined(name("Steve"), 1_700_000_000);
    record.played_seconds = 3600;
    db.write_player(record).await.unwrap();

    let (main, mut queue) = main_channel();
    let (mut world, mut rx) = world();
    let mut dispatcher = Dispatcher::new(main);
    register_defaults(&mut dispatcher, &cache);
    let handle = world.connect(id, name("Steve"));

    // WHEN: They run /playtime and their display name changes before the reply
    dispatcher.dispatch(&world, Invoker::Player(handle), "/playtime");
    world
        .session_mut(handle)
        .unwrap()
        .set_display_name("§kSomeone Else");
    let reply = next_outbound(&mut queue, &mut world, &mut rx).await;

    // THEN: The reply describes their own record under the captured name
    assert_eq!(
        reply,
        Outbound::Message {
            to: id,
            text: "§eSteve §afirst joined on §e2023-11-14 22:13 UTC §aand has played for §e3600 seconds §7(1h 0m 0s)§a."
                .to_string()
        }
    );
}

#[tokio::test]
async fn test_playtime_finds_offline_player_case_insensitively() {
    // GIVEN: An offline player known to the store
    let (db, cache) = sqlite_cache().await;
    let mut record = PlayerRecord::blank(PlayerId::new());
    record.mark_joined(name("Notch"), 1_700_000_000);
    record.played_seconds = 42;
    db.write_player(record).await.unwrap();

    let (main, mut queue) = main_channel();
    let (mut world, mut rx) = world();
    let mut dispatcher = Dispatcher::new(main);
    register_defaults(&mut dispatcher, &cache);

    // WHEN: Asking with a different case
    dispatcher.dispatch(&world, Invoker::Console, "playtime NOTCH");
    let reply = next_outbound(&mut queue, &mut world, &mut rx).await;

    // THEN: The stored name is shown
    let Outbound::Console { text } = reply else {
        panic!("expected a console reply, got {:?}", reply);
    };
    assert!(text.starts_with("§eNotch §afirst joined on"), "{}", text);
    assert!(text.contains("§e42 seconds §7(42s)"), "{}", text);

    // The one-off lookup does not keep the record cached
    assert!(cache.is_empty());
}
