//! Bridge from async tasks back to the main thread.
//!
//! Async code never touches [`World`] directly. It posts a short continuation
//! through [`MainHandle::run_on_main`]; the main loop runs queued continuations
//! in FIFO order after the update phase of each tick. Continuations must not
//! block: anything slow belongs in an async task that posts another
//! continuation when it is done.

use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::world::{PlayerHandle, World};

pub type MainTask = Box<dyn FnOnce(&mut World) + Send + 'static>;

/// Cloneable handle for posting work to the main thread.
#[derive(Clone)]
pub struct MainHandle {
    tasks: UnboundedSender<MainTask>,
    main_thread: Arc<OnceLock<ThreadId>>,
}

impl MainHandle {
    /// Queue `task` to run on the main thread after the current tick's update phase.
    pub fn run_on_main<F>(&self, task: F)
    where
        F: FnOnce(&mut World) + Send + 'static,
    {
        if self.tasks.send(Box::new(task)).is_err() {
            debug!("main loop stopped, dropping continuation");
        }
    }

    /// Like [`MainHandle::run_on_main`], but only runs if the captured session
    /// is still connected. A player who left is not an error; the task is
    /// dropped silently.
    pub fn run_for<F>(&self, player: PlayerHandle, task: F)
    where
        F: FnOnce(&mut World) + Send + 'static,
    {
        self.run_on_main(move |world| {
            if !world.is_connected(player) {
                debug!(player = %player.id, session = player.session, "player left, dropping continuation");
                return;
            }
            task(world);
        });
    }

    /// Whether the calling code runs on the main thread.
    pub fn is_main_thread(&self) -> bool {
        self.main_thread.get() == Some(&thread::current().id())
    }

    /// The thread that owns the world, once the main loop has started.
    pub fn current(&self) -> Option<ThreadId> {
        self.main_thread.get().copied()
    }

    /// Panic unless called from the main thread. Touching entity state from
    /// anywhere else is a bug.
    #[track_caller]
    pub fn assert_main_thread(&self) {
        assert!(
            self.is_main_thread(),
            "entity state accessed off the main thread ({:?})",
            thread::current().name()
        );
    }
}

/// Receiving side of the main-thread queue. Lives inside the main loop.
pub struct MainQueue {
    tasks: UnboundedReceiver<MainTask>,
    main_thread: Arc<OnceLock<ThreadId>>,
}

impl MainQueue {
    /// Claim the calling thread as the main thread. Only one thread can ever
    /// drive the queue.
    #[track_caller]
    pub fn bind_current_thread(&self) {
        let current = thread::current().id();
        let bound = *self.main_thread.get_or_init(|| current);
        assert_eq!(bound, current, "main loop driven from a second thread");
    }

    /// Run the continuations that were queued before this call, in order.
    /// Anything they enqueue waits for the next tick.
    pub fn drain(&mut self, world: &mut World) -> usize {
        let queued = self.tasks.len();
        let mut ran = 0;
        while ran < queued {
            match self.tasks.try_recv() {
                Ok(task) => {
                    task(world);
                    ran += 1;
                }
                Err(_) => break,
            }
        }
        ran
    }
}

pub fn main_channel() -> (MainHandle, MainQueue) {
    let (tasks_tx, tasks_rx) = mpsc::unbounded_channel();
    let main_thread = Arc::new(OnceLock::new());
    (
        MainHandle {
            tasks: tasks_tx,
            main_thread: Arc::clone(&main_thread),
        },
        MainQueue {
            tasks: tasks_rx,
            main_thread,
        },
    )
}
