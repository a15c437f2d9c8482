//! Facilities to wait for a set of concurrent tasks to complete.
//!
//! - [`WaitGroup`] and [`WaitGuard`] track an open-ended set of tasks with a
//!   single waiter. The dispatcher hands a guard to every worker it spawns
//!   and waits on the group during shutdown.
//! - [`CountingWaitGroup`] is the explicit `add`/`done` flavour, with a live
//!   count of outstanding completions for progress reporting.
//!
//! # Implementation Details
//!
//! [`WaitGroup`] is just a wrapper around [`tokio::sync::mpsc::channel`]. A
//! [`WaitGroup`] holds the unique [`tokio::sync::mpsc::Receiver`] and each
//! [`WaitGuard`] holds a [`tokio::sync::mpsc::Sender`].
//!
//! [`CountingWaitGroup`] keeps its count in a [`tokio::sync::watch`]
//! channel, so every update is a single locked modification and waiters are
//! woken by the update that brings the count to zero.

use std::sync::Arc;

use futures::never::Never;
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio::sync::watch;

/// Manager for a particular wait group. This can spawn a number of [`WaitGuard`]s
/// and it can then wait for them to all complete.
///
/// Each [`WaitGroup`] is single-use&mdash;calling [`WaitGroup::wait`] to start
/// waiting consumes the [`WaitGroup`]. Additionally, once all [`WaitGuard`]s
/// have been dropped, it is not possible to create any more [`WaitGuard`]s.
#[derive(Debug)]
pub struct WaitGroup {
    /// [`Receiver`] is held to wait for multiple [`Sender`]s and detect
    /// when they have closed. The [`Never`] type means no value can/will
    /// ever be received through the channel.
    recv: Receiver<Never>,
}

/// RAII guard held by a task which is being waited for.
///
/// The existence of values of this type represents outstanding work for
/// its corresponding [`WaitGroup`]. Cloning a guard registers more work.
#[derive(Clone, Debug)]
pub struct WaitGuard {
    /// Keeps the [`Receiver`] of the [`WaitGroup`] open until dropped.
    _send: Sender<Never>,
}

impl WaitGroup {
    /// Creates a new [`WaitGroup`] and its first associated [`WaitGuard`].
    ///
    /// Note that [`WaitGroup`] itself has no ability to create new guards.
    /// If needed, new guards should be created by cloning the returned [`WaitGuard`].
    #[must_use]
    pub fn new() -> (Self, WaitGuard) {
        let (send, recv) = channel(1);
        (Self { recv }, WaitGuard { _send: send })
    }

    /// Waits, asynchronously, until all the associated [`WaitGuard`]s have finished.
    pub async fn wait(mut self) {
        let None = self.recv.recv().await;
    }
}

/// A wait group with a queryable number of outstanding completions.
///
/// Callers fanning out `n` operations call [`CountingWaitGroup::add`] once
/// with `n`, let every operation call [`CountingWaitGroup::done`], and
/// [`wait`](CountingWaitGroup::wait) for all of them. Meanwhile
/// [`count`](CountingWaitGroup::count) can be polled to display progress.
///
/// Clones share the same counter.
///
/// ```
/// use throttled_client::CountingWaitGroup;
///
/// # #[tokio::main]
/// # async fn main() {
/// let pending = CountingWaitGroup::new();
/// pending.add(3);
/// for _ in 0..3 {
///     let pending = pending.clone();
///     tokio::spawn(async move {
///         pending.done();
///         println!("{} remaining", pending.count());
///     });
/// }
/// pending.wait().await;
/// assert_eq!(pending.count(), 0);
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct CountingWaitGroup {
    outstanding: Arc<watch::Sender<usize>>,
}

impl Default for CountingWaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl CountingWaitGroup {
    /// Create a wait group with nothing outstanding
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            outstanding: Arc::new(tx),
        }
    }

    /// Register `n` more completions to wait for
    pub fn add(&self, n: usize) {
        if n == 0 {
            return;
        }
        self.outstanding.send_modify(|count| *count = count.saturating_add(n));
    }

    /// Signal one completion.
    ///
    /// The count never drops below zero. A `done` without a matching `add` is
    /// a caller bug; it is logged and otherwise ignored.
    pub fn done(&self) {
        let decremented = self.outstanding.send_if_modified(|count| match count.checked_sub(1) {
            Some(next) => {
                *count = next;
                true
            }
            None => false,
        });
        if !decremented {
            log::warn!("CountingWaitGroup::done called more often than registered via add");
        }
    }

    /// Number of completions still outstanding.
    ///
    /// The value is a consistent snapshot but may be outdated as soon as it
    /// is returned. Use it for display, never for control flow.
    #[must_use]
    pub fn count(&self) -> usize {
        *self.outstanding.borrow()
    }

    /// Wait until every registered completion has been signalled.
    ///
    /// Returns immediately if nothing is outstanding.
    pub async fn wait(&self) {
        let mut rx = self.outstanding.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{CountingWaitGroup, WaitGroup};

    fn timeout<F: IntoFuture>(fut: F) -> tokio::time::Timeout<F::IntoFuture> {
        tokio::time::timeout(Duration::from_millis(250), fut)
    }

    #[tokio::test]
    async fn test_wait_group_waits_for_all_guards() {
        let (waiter, guard) = WaitGroup::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        for i in 0..4 {
            let guard = guard.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10 * i)).await;
                tx.send(i).unwrap();
                drop(guard);
            });
        }
        drop(guard);

        assert!(timeout(waiter.wait()).await.is_ok());
        drop(tx);
        let mut finished = 0;
        while rx.recv().await.is_some() {
            finished += 1;
        }
        assert_eq!(finished, 4);
    }

    #[tokio::test]
    async fn test_wait_group_blocks_on_extra_guard() {
        let (waiter, guard) = WaitGroup::new();
        let _extra = guard.clone();
        drop(guard);

        assert!(timeout(waiter.wait()).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_counting_concurrent_done() {
        let pending = CountingWaitGroup::new();
        pending.add(5);
        assert_eq!(pending.count(), 5);

        for _ in 0..5 {
            let pending = pending.clone();
            tokio::spawn(async move { pending.done() });
        }

        assert!(timeout(pending.wait()).await.is_ok());
        assert_eq!(pending.count(), 0);
    }

    #[tokio::test]
    async fn test_counting_wait_blocks_until_done() {
        let pending = CountingWaitGroup::new();
        pending.add(2);
        pending.done();

        assert!(timeout(pending.wait()).await.is_err());
        assert_eq!(pending.count(), 1);

        pending.done();
        assert!(timeout(pending.wait()).await.is_ok());
    }

    #[tokio::test]
    async fn test_counting_empty_wait_returns() {
        let pending = CountingWaitGroup::default();
        assert!(timeout(pending.wait()).await.is_ok());
    }

    #[test]
    fn test_counting_never_negative() {
        let pending = CountingWaitGroup::new();
        pending.done();
        assert_eq!(pending.count(), 0);

        pending.add(1);
        pending.done();
        pending.done();
        assert_eq!(pending.count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_counting_observed_values_stay_in_range() {
        let pending = CountingWaitGroup::new();
        pending.add(100);

        let observer = {
            let pending = pending.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while pending.count() > 0 {
                    seen.push(pending.count());
                    tokio::task::yield_now().await;
                }
                seen
            })
        };

        let workers: Vec<_> = (0..100)
            .map(|_| {
                let pending = pending.clone();
                tokio::spawn(async move { pending.done() })
            })
            .collect();
        for worker in workers {
            worker.await.unwrap();
        }

        pending.wait().await;
        let seen = observer.await.unwrap();
        assert!(seen.iter().all(|count| *count <= 100));
        assert!(seen.windows(2).all(|w| w[0] >= w[1]));
    }
}
