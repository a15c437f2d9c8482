use std::fmt;

use futures::future::BoxFuture;
use reqwest::{Client, Request, Response};

use crate::types::Reply;
use crate::{ErrorKind, FetchedResponse, GroupOutcome, RequestGroup, Result};

/// A unit of submitted work, consumed exactly once by a worker or by the
/// shutdown drain.
pub(crate) enum WorkItem {
    Single {
        request: Request,
        reply: Reply<Response>,
    },
    Group(Box<dyn GroupJob>),
}

impl WorkItem {
    pub(crate) fn group<G: RequestGroup>(group: G, reply: Reply<GroupOutcome<G>>) -> Self {
        Self::Group(Box::new(GroupTask { group, reply }))
    }

    /// Run the item to completion and deliver its result.
    pub(crate) async fn execute(self, client: Client) {
        match self {
            Self::Single { request, reply } => {
                let result = client.execute(request).await.map_err(ErrorKind::Transport);
                deliver(reply, result);
            }
            Self::Group(job) => job.run(client).await,
        }
    }

    /// Resolve the item without running it.
    pub(crate) fn reject(self, error: ErrorKind) {
        match self {
            Self::Single { reply, .. } => deliver(reply, Err(error)),
            Self::Group(job) => job.reject(error),
        }
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single { request, .. } => write!(f, "{} {}", request.method(), request.url()),
            Self::Group(_) => f.write_str("request group"),
        }
    }
}

/// Type-erased request group together with its reply channel.
pub(crate) trait GroupJob: Send {
    fn run(self: Box<Self>, client: Client) -> BoxFuture<'static, ()>;
    fn reject(self: Box<Self>, error: ErrorKind);
}

struct GroupTask<G: RequestGroup> {
    group: G,
    reply: Reply<GroupOutcome<G>>,
}

impl<G: RequestGroup> GroupJob for GroupTask<G> {
    fn run(self: Box<Self>, client: Client) -> BoxFuture<'static, ()> {
        let Self { group, reply } = *self;
        Box::pin(async move {
            let result = run_group(&client, group).await;
            deliver(reply, result);
        })
    }

    fn reject(self: Box<Self>, error: ErrorKind) {
        deliver(self.reply, Err(error));
    }
}

fn deliver<T>(reply: Reply<T>, result: Result<T>) {
    if reply.send(result).is_err() {
        log::trace!("Result discarded, the ticket was dropped");
    }
}

/// Drive `group` through all of its steps, strictly one after another.
///
/// The first failing step aborts the group; the responses collected so far
/// are dropped with it.
pub(crate) async fn run_group<G: RequestGroup>(
    client: &Client,
    mut group: G,
) -> Result<GroupOutcome<G>> {
    let mut request = group.next(None).ok_or(ErrorKind::EmptyGroup)?;
    let mut responses = Vec::new();

    loop {
        let step = responses.len();
        log::trace!("Group step {step}: {} {}", request.method(), request.url());

        let response = fetch(client, request)
            .await
            .map_err(|source| ErrorKind::GroupAborted {
                step,
                source: Box::new(source),
            })?;

        let next = group.next(Some(&response));
        responses.push(response);
        match next {
            Some(next) => request = next,
            None => break,
        }
    }

    Ok(GroupOutcome { group, responses })
}

async fn fetch(client: &Client, request: Request) -> Result<FetchedResponse> {
    let response = client
        .execute(request)
        .await
        .map_err(ErrorKind::Transport)?;
    FetchedResponse::from_response(response).await
}
