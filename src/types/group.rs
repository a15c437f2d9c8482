use reqwest::Request;

use super::FetchedResponse;

/// A sequence of dependent HTTP requests, executed one after another.
///
/// The dispatcher calls [`RequestGroup::next`] with `None` exactly once to
/// obtain the first request, and then once with every response it receives.
/// Returning `None` ends the group. Steps of a group never overlap.
///
/// This models protocols with server-issued continuation data, e.g. a token
/// endpoint followed by a download authorized with that token:
///
/// ```
/// use reqwest::{Method, Request, Url};
/// use throttled_client::{FetchedResponse, RequestGroup};
///
/// struct TokenDownload {
///     base: Url,
///     token: Option<String>,
///     data: Vec<u8>,
/// }
///
/// impl RequestGroup for TokenDownload {
///     fn next(&mut self, previous: Option<&FetchedResponse>) -> Option<Request> {
///         let Some(previous) = previous else {
///             return Some(Request::new(Method::POST, self.base.join("token").ok()?));
///         };
///         if self.token.is_none() {
///             let token = previous.text().into_owned();
///             let mut url = self.base.join("data").ok()?;
///             url.query_pairs_mut().append_pair("token", &token);
///             self.token = Some(token);
///             return Some(Request::new(Method::GET, url));
///         }
///         self.data = previous.body().to_vec();
///         None
///     }
/// }
/// ```
pub trait RequestGroup: Send + 'static {
    /// Produce the request following `previous`, or `None` when the group is
    /// complete.
    ///
    /// Groups should only accumulate their own result state here. The
    /// accumulated state is handed back through [`GroupOutcome::group`] once
    /// every step succeeded.
    fn next(&mut self, previous: Option<&FetchedResponse>) -> Option<Request>;
}

/// The result of a successfully completed [`RequestGroup`]
#[derive(Debug)]
pub struct GroupOutcome<G> {
    /// The group itself, carrying whatever state it accumulated
    pub group: G,
    /// Every response of the group, in request order
    pub responses: Vec<FetchedResponse>,
}

impl<G> GroupOutcome<G> {
    /// Number of requests the group executed
    #[must_use]
    pub fn steps(&self) -> usize {
        self.responses.len()
    }

    /// The response of the final step
    #[must_use]
    pub fn last_response(&self) -> Option<&FetchedResponse> {
        self.responses.last()
    }

    /// Discard the responses and keep the group state
    #[must_use]
    pub fn into_group(self) -> G {
        self.group
    }
}
