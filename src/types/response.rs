use std::borrow::Cow;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use reqwest::{Response, Url};
use serde::de::DeserializeOwned;

use crate::{ErrorKind, Result};

/// A fully buffered HTTP response.
///
/// Request groups decide on their next request synchronously, so the body
/// of every group step is read before it is handed to
/// [`RequestGroup::next`](crate::RequestGroup::next). This abstraction
/// exists because a [`Response`] can only be consumed once and does not
/// implement [`Clone`].
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    body: Bytes,
}

impl FetchedResponse {
    /// Read the whole body of `response` into memory.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ReadBody`] if the body cannot be read.
    pub async fn from_response(response: Response) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await.map_err(ErrorKind::ReadBody)?;

        Ok(Self {
            status,
            headers,
            url,
            body,
        })
    }

    /// Status code of the response
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Final URL of the response, after redirects
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Raw response body
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Response body as text. Invalid UTF-8 sequences are replaced.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Decode the response body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Decode`] if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

impl From<http::Response<Bytes>> for FetchedResponse {
    /// Build a response without a network round trip.
    ///
    /// The URL defaults to `http://localhost/` when the response carries
    /// none.
    fn from(response: http::Response<Bytes>) -> Self {
        let url = response
            .extensions()
            .get::<Url>()
            .cloned()
            .unwrap_or_else(|| Url::parse("http://localhost/").expect("static URL is valid"));
        let (parts, body) = response.into_parts();
        Self {
            status: parts.status,
            headers: parts.headers,
            url,
            body,
        }
    }
}
