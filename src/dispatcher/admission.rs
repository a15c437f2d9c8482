use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::Client;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};

use super::State;
use super::worker::WorkItem;
use crate::ErrorKind;
use crate::waiter::WaitGuard;

/// The admission loop: takes one item off the queue per tick and spawns a
/// worker for it.
///
/// Admission is the only rate-limited step. Workers are not awaited here, so
/// any number of admitted items may be running at the same time.
#[derive(Debug)]
pub(super) struct Admission {
    pub(super) queue: mpsc::Receiver<WorkItem>,
    pub(super) interval: Duration,
    pub(super) client: Client,
    pub(super) lifecycle: watch::Receiver<State>,
    pub(super) in_flight: Arc<AtomicUsize>,
    /// Cloned into every worker; dropped when the loop ends
    pub(super) guard: WaitGuard,
}

impl Admission {
    pub(super) async fn run(mut self) {
        // The first admission happens one interval after start, every later
        // one at least one interval after the previous admission.
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = closing(&mut self.lifecycle) => break,
                _ = ticker.tick() => {}
            }

            let item = tokio::select! {
                biased;
                () = closing(&mut self.lifecycle) => break,
                item = self.queue.recv() => item,
            };

            // All senders are gone: the dispatcher was dropped without `stop`.
            let Some(item) = item else { break };
            self.dispatch(item);
            // Ticks missed while the queue was empty don't count.
            ticker.reset();
        }

        log::debug!("Admission loop stopped");
        drain(self.queue).await;
    }

    fn dispatch(&self, item: WorkItem) {
        log::trace!("Admitting {item:?}");

        let client = self.client.clone();
        let guard = self.guard.clone();
        let in_flight = self.in_flight.clone();
        in_flight.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            item.execute(client).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            drop(guard);
        });
    }
}

/// Close `queue` and resolve everything still waiting in it with
/// [`ErrorKind::Closed`].
///
/// Returns once no submitter can add to the queue anymore, including those
/// which had already reserved a slot when the queue was closed.
pub(super) async fn drain(mut queue: mpsc::Receiver<WorkItem>) {
    queue.close();

    let mut drained = 0_usize;
    while let Some(item) = queue.recv().await {
        item.reject(ErrorKind::Closed);
        drained += 1;
    }

    if drained > 0 {
        log::debug!("Rejected {drained} queued item(s) on shutdown");
    }
}

/// Resolves once the dispatcher starts shutting down.
pub(super) async fn closing(lifecycle: &mut watch::Receiver<State>) {
    // A dropped sender means the dispatcher itself is gone.
    let _ = lifecycle.wait_for(|state| state.is_closing()).await;
}
