use std::pin::Pin;

use tokio::sync::oneshot;

use crate::{ErrorKind, Result};

/// Sending half of a result channel, owned by a work item.
pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Handle to the result of a submitted work item.
///
/// Exactly one result is delivered per ticket: the response on success, or
/// the error that ended the item. A ticket can be awaited directly.
#[derive(Debug)]
#[must_use = "a ticket does nothing unless its result is awaited"]
pub struct Ticket<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Ticket<T> {
    pub(crate) fn channel() -> (Reply<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Wait for the result of the work item.
    ///
    /// # Errors
    ///
    /// Returns the error the item failed with. If the dispatcher dropped the
    /// item without answering, [`ErrorKind::Closed`] is returned.
    pub async fn result(self) -> Result<T> {
        self.rx.await.unwrap_or(Err(ErrorKind::Closed))
    }

    /// Check for the result without waiting.
    ///
    /// Returns `None` while the item is still queued or running.
    pub fn try_result(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(ErrorKind::Closed)),
        }
    }
}

impl<T: Send + 'static> IntoFuture for Ticket<T> {
    type Output = Result<T>;
    type IntoFuture = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.result())
    }
}
