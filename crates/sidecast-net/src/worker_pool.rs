//! Elastic/fixed worker pool driving HTTP dispatch. See spec section 4.8.
//!
//! Workers pull from a shared bounded queue. In elastic mode
//! (`workers = -1`) one worker starts immediately; the enqueue side asks
//! for more whenever the queue backs up or every worker has died, and a
//! worker that finds the queue empty for 20 consecutive 100ms polls
//! exits on its own. The active count is the net of spawns minus deaths,
//! tracked with a plain atomic rather than a literal spawn/death channel
//! pair, since both ends live in this module and there is no cross-task
//! race to arbitrate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sidecast_core::Message;
use tracing::debug;

/// High-watermark queue depth that triggers spawning another worker.
const HIGH_WATERMARK: usize = 10;
/// Consecutive idle 100ms polls before an elastic worker exits.
const IDLE_POLLS_BEFORE_EXIT: u32 = 20;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCount {
    Fixed(usize),
    /// `outputHTTPWorkers = -1` in the original CLI.
    Elastic,
}

/// Owns the work queue and spawns/retires workers that run `dispatch`
/// against each dequeued message.
pub struct WorkerSupervisor<F> {
    rx: async_channel::Receiver<Message>,
    active: AtomicUsize,
    elastic: bool,
    dispatch: F,
}

impl<F> WorkerSupervisor<F>
where
    F: Fn(Message) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> + Send + Sync + 'static,
{
    pub fn start(
        rx: async_channel::Receiver<Message>,
        workers: WorkerCount,
        dispatch: F,
    ) -> Arc<Self> {
        let elastic = matches!(workers, WorkerCount::Elastic);
        let supervisor = Arc::new(Self {
            rx,
            active: AtomicUsize::new(0),
            elastic,
            dispatch,
        });

        let initial = match workers {
            WorkerCount::Fixed(n) => n.max(1),
            WorkerCount::Elastic => 1,
        };
        for _ in 0..initial {
            supervisor.clone().spawn_worker();
        }
        supervisor
    }

    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Called by the enqueue side after pushing a message: spawns an
    /// additional worker if the queue is backing up or every worker has
    /// died since the last check. No-op in fixed mode.
    pub fn maybe_scale(self: &Arc<Self>) {
        if !self.elastic {
            return;
        }
        let depth = self.rx.len();
        let active = self.active_workers();
        if depth > HIGH_WATERMARK || (depth > 0 && active == 0) {
            self.clone().spawn_worker();
        }
    }

    fn spawn_worker(self: Arc<Self>) {
        self.active.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            self.run_worker().await;
        });
    }

    async fn run_worker(self: Arc<Self>) {
        let mut idle_polls = 0u32;
        loop {
            match tokio::time::timeout(POLL_INTERVAL, self.rx.recv()).await {
                Ok(Ok(msg)) => {
                    idle_polls = 0;
                    (self.dispatch)(msg).await;
                }
                Ok(Err(_)) => break, // queue closed: no more senders
                Err(_) => {
                    idle_polls += 1;
                    if self.elastic && idle_polls > IDLE_POLLS_BEFORE_EXIT {
                        // Always keep at least one worker alive.
                        if self.active_workers() > 1 {
                            debug!("elastic worker idle past threshold, exiting");
                            break;
                        }
                        idle_polls = 0;
                    }
                }
            }
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
