//! Playtime accrual.
//!
//! Every tick each ready player gains one pending tick. Once per flush interval
//! the whole seconds are written with a single `mutate` per player; leftover
//! ticks carry over to the next interval.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::RecordCache;
use crate::world::{JoinPhase, OnlinePlayer, World};

pub struct PlaytimeAccrual {
    cache: Arc<RecordCache>,
    tick_rate: u64,
    flush_every_ticks: u64,
}

impl PlaytimeAccrual {
    pub fn new(cache: Arc<RecordCache>, tick_rate: u32, flush_every_ticks: u64) -> Self {
        Self {
            cache,
            tick_rate: u64::from(tick_rate.max(1)),
            flush_every_ticks: flush_every_ticks.max(1),
        }
    }

    /// Sample one tick for every ready player, flushing on interval boundaries.
    pub fn on_tick(&self, world: &mut World) {
        let flush = world.tick() % self.flush_every_ticks == 0;
        let mut flushed = 0usize;
        for player in world.online_mut() {
            if player.phase != JoinPhase::Ready {
                continue;
            }
            player.pending_ticks += 1;
            if flush {
                let seconds = self.settle(player);
                if seconds > 0 {
                    self.persist(player, seconds);
                    flushed += 1;
                }
            }
        }
        if flushed > 0 {
            debug!(players = flushed, tick = world.tick(), "flushing playtime");
        }
    }

    /// Take the whole seconds out of the player's pending ticks.
    pub fn settle(&self, player: &mut OnlinePlayer) -> u64 {
        let seconds = player.pending_ticks / self.tick_rate;
        player.pending_ticks %= self.tick_rate;
        seconds
    }

    fn persist(&self, player: &OnlinePlayer, seconds: u64) {
        let cache = Arc::clone(&self.cache);
        let id = player.id();
        tokio::spawn(async move {
            if let Err(err) = cache.mutate(id, |r| r.played_seconds += seconds).await {
                warn!(player = %id, seconds, error = %err, "failed to record playtime");
            }
        });
    }
}
