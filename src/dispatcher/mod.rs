//! The rate-limited request dispatcher.
//!
//! A [`Dispatcher`] accepts two kinds of work: single requests
//! ([`Dispatcher::submit`]) and request groups
//! ([`Dispatcher::submit_group`]). Work waits in a bounded queue and is
//! admitted at a fixed interval, one item per tick. Every admitted item runs
//! on its own task, so slow responses never hold up admission.
//!
//! # Lifecycle
//!
//! ```text
//! Created --start()--> Running --stop()--> Stopping --> Stopped
//! ```
//!
//! Work is only accepted while `Running`. On `stop` the queue is closed,
//! every item still waiting in it is resolved with [`ErrorKind::Closed`] and
//! the call returns once all admitted items have finished.

mod admission;
mod worker;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::{Client, Request, Response};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::waiter::{WaitGroup, WaitGuard};
use crate::{ErrorKind, GroupOutcome, RequestGroup, Result, Ticket};
use admission::{Admission, closing, drain};
use worker::WorkItem;

/// Lifecycle state of a [`Dispatcher`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    /// Built, but not admitting yet. Submissions are rejected.
    Created,
    /// Admitting queued work.
    Running,
    /// Shutdown has begun. Submissions are rejected.
    Stopping,
    /// All work has finished. Terminal.
    Stopped,
}

impl State {
    /// Returns `true` once shutdown has begun
    #[must_use]
    pub const fn is_closing(self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }
}

/// Resources of a dispatcher which has not been started yet
#[derive(Debug)]
struct Idle {
    queue: mpsc::Receiver<WorkItem>,
    waiter: WaitGroup,
    guard: WaitGuard,
}

/// Resources of a running dispatcher
#[derive(Debug)]
struct Active {
    admission: JoinHandle<()>,
    waiter: WaitGroup,
}

#[derive(Debug)]
enum Phase {
    Created(Idle),
    Running(Active),
    Stopping,
    Stopped,
}

#[derive(Debug)]
struct Inner {
    client: Client,
    interval: Duration,
    capacity: usize,
    queue: mpsc::Sender<WorkItem>,
    lifecycle: watch::Sender<State>,
    phase: Mutex<Phase>,
    in_flight: Arc<AtomicUsize>,
}

impl Inner {
    fn phase(&self) -> MutexGuard<'_, Phase> {
        // The phase is replaced wholesale, a poisoned lock still holds a valid value.
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Rate-limited HTTP request dispatcher.
///
/// Cloning a dispatcher is cheap and yields another handle to the same
/// queue, so many producers can share one instance.
///
/// ```no_run
/// use throttled_client::{DispatcherBuilder, Result};
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let dispatcher = DispatcherBuilder::default().dispatcher()?;
///     dispatcher.start()?;
///
///     let request = dispatcher
///         .client()
///         .get("https://example.com")
///         .build()
///         .map_err(throttled_client::ErrorKind::Transport)?;
///     let response = dispatcher.submit(request).await?.await?;
///     println!("{}", response.status());
///
///     dispatcher.stop().await;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub(crate) fn new(client: Client, interval: Duration, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let (waiter, guard) = WaitGroup::new();
        let (lifecycle, _) = watch::channel(State::Created);

        Self {
            inner: Arc::new(Inner {
                client,
                interval,
                capacity,
                queue: tx,
                lifecycle,
                phase: Mutex::new(Phase::Created(Idle {
                    queue: rx,
                    waiter,
                    guard,
                })),
                in_flight: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Start admitting queued work.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NoRuntime`] when called outside of a Tokio
    /// runtime and [`ErrorKind::AlreadyStarted`] when the dispatcher is not
    /// in the `Created` state.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()?;

        let mut phase = self.inner.phase();
        match std::mem::replace(&mut *phase, Phase::Stopping) {
            Phase::Created(Idle {
                queue,
                waiter,
                guard,
            }) => {
                let admission = Admission {
                    queue,
                    interval: self.inner.interval,
                    client: self.inner.client.clone(),
                    lifecycle: self.inner.lifecycle.subscribe(),
                    in_flight: self.inner.in_flight.clone(),
                    guard,
                };
                *phase = Phase::Running(Active {
                    admission: runtime.spawn(admission.run()),
                    waiter,
                });
                self.inner.lifecycle.send_replace(State::Running);
                log::debug!(
                    "Dispatcher started (interval {:?}, capacity {})",
                    self.inner.interval,
                    self.inner.capacity
                );
                Ok(())
            }
            other => {
                *phase = other;
                Err(ErrorKind::AlreadyStarted)
            }
        }
    }

    /// Queue a single request.
    ///
    /// Waits for a free slot if the queue is full. The returned [`Ticket`]
    /// resolves to the response, or to the error that prevented it.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Closed`] if the dispatcher is not running, or
    /// starts shutting down while waiting for a slot.
    pub async fn submit(&self, request: Request) -> Result<Ticket<Response>> {
        let (reply, ticket) = Ticket::channel();
        self.enqueue(WorkItem::Single { request, reply }).await?;
        Ok(ticket)
    }

    /// Queue a request group.
    ///
    /// The group occupies a single admission: once admitted, all of its steps
    /// run back to back on one task. The returned [`Ticket`] resolves to the
    /// group and all of its responses, or to the error of the failing step.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Closed`] if the dispatcher is not running, or
    /// starts shutting down while waiting for a slot.
    pub async fn submit_group<G: RequestGroup>(
        &self,
        group: G,
    ) -> Result<Ticket<GroupOutcome<G>>> {
        let (reply, ticket) = Ticket::channel();
        self.enqueue(WorkItem::group(group, reply)).await?;
        Ok(ticket)
    }

    /// Queue a single request and wait for its response.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::submit`]. Additionally returns the error the request
    /// failed with.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.submit(request).await?.result().await
    }

    /// Queue a request group and wait for it to complete.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::submit_group`]. Additionally returns the error the
    /// group was aborted with.
    pub async fn execute_group<G: RequestGroup>(&self, group: G) -> Result<GroupOutcome<G>> {
        self.submit_group(group).await?.result().await
    }

    async fn enqueue(&self, item: WorkItem) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.subscribe();
        if *lifecycle.borrow_and_update() != State::Running {
            return Err(ErrorKind::Closed);
        }

        // Shutdown wins over a free slot. A slot reserved before shutdown
        // began is honoured: the drain waits for it and rejects the item.
        let permit = tokio::select! {
            biased;
            () = closing(&mut lifecycle) => return Err(ErrorKind::Closed),
            permit = self.inner.queue.reserve() => permit.map_err(|_| ErrorKind::Closed)?,
        };
        permit.send(item);
        Ok(())
    }

    /// Shut the dispatcher down.
    ///
    /// Stops admission, resolves every queued item with
    /// [`ErrorKind::Closed`], and waits for all admitted items to finish.
    /// Items already running are not interrupted.
    ///
    /// Calling `stop` more than once is safe: later calls wait until the
    /// first one has completed. The future should be driven to completion;
    /// dropping it halfway leaves the dispatcher in `Stopping`.
    pub async fn stop(&self) {
        let teardown = {
            let mut phase = self.inner.phase();
            match std::mem::replace(&mut *phase, Phase::Stopping) {
                Phase::Created(idle) => Some(Teardown::Idle(idle)),
                Phase::Running(active) => Some(Teardown::Active(active)),
                other => {
                    *phase = other;
                    None
                }
            }
        };

        let Some(teardown) = teardown else {
            let mut lifecycle = self.inner.lifecycle.subscribe();
            let _ = lifecycle.wait_for(|state| *state == State::Stopped).await;
            return;
        };

        // Submitters observe this before the queue is closed.
        self.inner.lifecycle.send_replace(State::Stopping);
        log::debug!("Dispatcher stopping");

        let waiter = match teardown {
            Teardown::Idle(Idle {
                queue,
                waiter,
                guard,
            }) => {
                drop(guard);
                drain(queue).await;
                waiter
            }
            Teardown::Active(Active { admission, waiter }) => {
                if let Err(e) = admission.await {
                    log::warn!("Admission task failed: {e}");
                }
                waiter
            }
        };

        waiter.wait().await;

        *self.inner.phase() = Phase::Stopped;
        self.inner.lifecycle.send_replace(State::Stopped);
        log::debug!("Dispatcher stopped");
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> State {
        *self.inner.lifecycle.borrow()
    }

    /// Number of admitted items which have not finished yet
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Number of items waiting for admission, including slots reserved by
    /// submitters that are about to enqueue
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.capacity - self.inner.queue.capacity()
    }

    /// Interval between two admissions
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Maximum number of queued items
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// The underlying HTTP client, e.g. to build requests with
    /// [`Client::get`] and friends
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.inner.client
    }
}

enum Teardown {
    Idle(Idle),
    Active(Active),
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::StatusCode;
    use reqwest::{Method, Url};

    use super::*;
    use crate::DispatcherBuilder;
    use crate::test_utils::get_mock_server;

    fn dispatcher(interval: Duration, capacity: usize) -> Dispatcher {
        DispatcherBuilder::builder()
            .interval(interval)
            .capacity(capacity)
            .build()
            .dispatcher()
            .unwrap()
    }

    fn get(url: &str) -> Request {
        Request::new(Method::GET, Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_submit_before_start_is_closed() {
        let dispatcher = dispatcher(Duration::from_millis(10), 1);
        let result = dispatcher.submit(get("http://localhost/")).await;
        assert!(matches!(result, Err(ErrorKind::Closed)));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let dispatcher = dispatcher(Duration::from_millis(10), 1);
        dispatcher.start().unwrap();
        assert_eq!(dispatcher.start(), Err(ErrorKind::AlreadyStarted));
        assert_eq!(dispatcher.state(), State::Running);
        dispatcher.stop().await;
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let dispatcher = dispatcher(Duration::from_millis(10), 1);
        assert!(matches!(dispatcher.start(), Err(ErrorKind::NoRuntime(_))));
        assert_eq!(dispatcher.state(), State::Created);
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let server = get_mock_server(StatusCode::OK).await;
        let dispatcher = dispatcher(Duration::from_millis(10), 4);
        assert_eq!(dispatcher.state(), State::Created);

        dispatcher.start().unwrap();
        assert_eq!(dispatcher.state(), State::Running);

        let response = dispatcher.execute(get(&server.uri())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        dispatcher.stop().await;
        assert_eq!(dispatcher.state(), State::Stopped);
        assert_eq!(dispatcher.in_flight(), 0);
        assert_eq!(dispatcher.start(), Err(ErrorKind::AlreadyStarted));
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let dispatcher = dispatcher(Duration::from_millis(10), 1);
        dispatcher.stop().await;
        assert_eq!(dispatcher.state(), State::Stopped);

        let result = dispatcher.submit(get("http://localhost/")).await;
        assert!(matches!(result, Err(ErrorKind::Closed)));
    }

    #[tokio::test]
    async fn test_concurrent_stop_calls_both_return() {
        let dispatcher = dispatcher(Duration::from_millis(10), 1);
        dispatcher.start().unwrap();

        let other = dispatcher.clone();
        tokio::join!(dispatcher.stop(), other.stop());

        assert_eq!(dispatcher.state(), State::Stopped);
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_queued_counts_waiting_items() {
        let dispatcher = dispatcher(Duration::from_secs(3600), 3);
        dispatcher.start().unwrap();

        let _first = dispatcher.submit(get("http://localhost/")).await.unwrap();
        let _second = dispatcher.submit(get("http://localhost/")).await.unwrap();
        assert_eq!(dispatcher.queued(), 2);
        assert_eq!(dispatcher.in_flight(), 0);

        dispatcher.stop().await;
    }
}
