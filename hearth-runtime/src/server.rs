//! The tick loop.
//!
//! Each tick has two phases. The update phase applies queued server events
//! and samples playtime. The continuation phase then runs whatever async
//! tasks posted back through [`MainHandle::run_on_main`]. Nothing in either
//! phase waits on I/O.

use hearth_db::{PlayerId, PlayerName};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::RecordCache;
use crate::commands::register_defaults;
use crate::config::Config;
use crate::dispatcher::{Dispatcher, Invoker};
use crate::pipeline::{JoinOutcome, JoinPipeline};
use crate::playtime::PlaytimeAccrual;
use crate::scheduler::{MainHandle, MainQueue, main_channel};
use crate::world::{Outbound, PlayerHandle, World};

/// Input from the network layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connect { id: PlayerId, name: PlayerName },
    Disconnect { id: PlayerId },
    /// A command line. `from: None` is the console.
    Command { from: Option<PlayerId>, line: String },
}

/// Counters published by the main loop for the status endpoint.
#[derive(Debug, Default)]
pub struct ServerStats {
    tick: AtomicU64,
    online: AtomicUsize,
}

impl ServerStats {
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    pub fn online(&self) -> usize {
        self.online.load(Ordering::Relaxed)
    }
}

pub struct Server {
    world: World,
    queue: MainQueue,
    main: MainHandle,
    events: UnboundedReceiver<ServerEvent>,
    dispatcher: Dispatcher,
    pipeline: JoinPipeline,
    accrual: PlaytimeAccrual,
    cache: Arc<RecordCache>,
    stats: Arc<ServerStats>,
    running: Arc<AtomicBool>,
    tick_rate: u32,
    sweep_every: u64,
}

/// Cloneable access to a running [`Server`] from other threads.
#[derive(Clone)]
pub struct ServerHandle {
    events: UnboundedSender<ServerEvent>,
    main: MainHandle,
    stats: Arc<ServerStats>,
    cache: Arc<RecordCache>,
    running: Arc<AtomicBool>,
}

impl Server {
    pub fn new(
        config: &Config,
        cache: Arc<RecordCache>,
        egress: UnboundedSender<Outbound>,
    ) -> (Self, ServerHandle) {
        let (main, queue) = main_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(ServerStats::default());
        let running = Arc::new(AtomicBool::new(true));

        let mut dispatcher = Dispatcher::new(main.clone());
        register_defaults(&mut dispatcher, &cache);

        let server = Self {
            world: World::new(egress),
            queue,
            main: main.clone(),
            events: events_rx,
            dispatcher,
            pipeline: JoinPipeline::new(
                Arc::clone(&cache),
                main.clone(),
                config.welcome_messages.clone(),
            ),
            accrual: PlaytimeAccrual::new(
                Arc::clone(&cache),
                config.tick_rate,
                config.playtime_flush_ticks(),
            ),
            cache: Arc::clone(&cache),
            stats: Arc::clone(&stats),
            running: Arc::clone(&running),
            tick_rate: config.tick_rate.max(1),
            sweep_every: config.cache_sweep_ticks(),
        };
        let handle = ServerHandle {
            events: events_tx,
            main,
            stats,
            cache,
            running,
        };
        (server, handle)
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// Run one tick. Must be called from within a tokio runtime context.
    pub fn tick(&mut self) {
        self.queue.bind_current_thread();
        let tick = self.world.advance();

        let pending = self.events.len();
        for _ in 0..pending {
            match self.events.try_recv() {
                Ok(event) => self.handle_event(event),
                Err(_) => break,
            }
        }
        self.accrual.on_tick(&mut self.world);
        if tick % self.sweep_every == 0 {
            let cache = Arc::clone(&self.cache);
            tokio::spawn(async move {
                cache.sweep().await;
            });
        }

        self.queue.drain(&mut self.world);

        self.stats.tick.store(tick, Ordering::Relaxed);
        self.stats
            .online
            .store(self.world.online_count(), Ordering::Relaxed);
    }

    fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connect { id, name } => {
                self.connect(id, name);
            }
            ServerEvent::Disconnect { id } => {
                if self.disconnect(id).is_none() {
                    debug!(player = %id, "disconnect for unknown player");
                }
            }
            ServerEvent::Command { from, line } => self.dispatch(from, &line),
        }
    }

    pub fn connect(&mut self, id: PlayerId, name: PlayerName) -> (PlayerHandle, JoinHandle<JoinOutcome>) {
        self.main.assert_main_thread();
        if let Some(mut stale) = self.world.disconnect(id) {
            debug!(player = %id, "connect replaces a live session");
            let seconds = self.accrual.settle(&mut stale);
            self.pipeline.on_replaced(id, seconds);
        }
        self.pipeline.on_connect(&mut self.world, id, name)
    }

    /// Remove the session and flush its playtime. `None` if the player was not connected.
    pub fn disconnect(&mut self, id: PlayerId) -> Option<JoinHandle<()>> {
        self.main.assert_main_thread();
        let mut player = self.world.disconnect(id)?;
        let seconds = self.accrual.settle(&mut player);
        Some(self.pipeline.on_disconnect(id, seconds))
    }

    pub fn dispatch(&mut self, from: Option<PlayerId>, line: &str) {
        self.main.assert_main_thread();
        let invoker = match from {
            None => Invoker::Console,
            Some(id) => match self.world.player(id) {
                Some(player) => Invoker::Player(player.handle()),
                None => {
                    debug!(player = %id, "command from player who is not connected");
                    return;
                }
            },
        };
        self.dispatcher.dispatch(&self.world, invoker, line);
    }

    /// Drive the loop at the configured tick rate until [`ServerHandle::shutdown`].
    pub fn run(mut self, runtime: Handle) {
        let _guard = runtime.enter();
        let period = Duration::from_secs(1) / self.tick_rate;
        info!(tick_rate = self.tick_rate, "main loop started");

        let mut deadline = Instant::now();
        while self.running.load(Ordering::Acquire) {
            self.tick();

            deadline += period;
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            } else {
                let behind = now - deadline;
                if behind > period {
                    warn!(tick = self.world.tick(), behind_ms = behind.as_millis() as u64, "main loop is running behind");
                }
                deadline = now;
            }
        }
        info!(tick = self.world.tick(), "main loop stopped");
    }
}

impl ServerHandle {
    /// Queue an event for the next tick. Returns false once the loop is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn main(&self) -> &MainHandle {
        &self.main
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    pub fn cache(&self) -> Arc<RecordCache> {
        Arc::clone(&self.cache)
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }
}
