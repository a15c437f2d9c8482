//! Construction of a [`Dispatcher`].
//!
//! [`DispatcherBuilder`] collects the admission settings and the options of
//! the underlying `reqwest` client. It can be filled in field by field or
//! converted from a [`DispatcherConfig`].
#![allow(clippy::module_name_repetitions)]
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::header::{self, HeaderMap, HeaderValue};
use typed_builder::TypedBuilder;

use crate::config::{
    self, DEFAULT_CAPACITY, DEFAULT_CONNECT_TIMEOUT, DEFAULT_INTERVAL, DEFAULT_TCP_KEEPALIVE,
    DEFAULT_USER_AGENT, DispatcherConfig,
};
use crate::{Dispatcher, ErrorKind, Result};

/// A hook applied to the `reqwest` client builder before the client is
/// built, e.g. to install a proxy or a custom resolver.
#[derive(Clone)]
pub struct ClientHook(Arc<dyn Fn(reqwest::ClientBuilder) -> reqwest::ClientBuilder + Send + Sync>);

impl ClientHook {
    fn apply(&self, builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        (self.0)(builder)
    }
}

impl<F> From<F> for ClientHook
where
    F: Fn(reqwest::ClientBuilder) -> reqwest::ClientBuilder + Send + Sync + 'static,
{
    fn from(f: F) -> Self {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for ClientHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientHook")
    }
}

/// Builder for [`Dispatcher`].
///
/// ```
/// use std::time::Duration;
/// use throttled_client::DispatcherBuilder;
///
/// # fn main() -> throttled_client::Result<()> {
/// let dispatcher = DispatcherBuilder::builder()
///     .interval(Duration::from_millis(500))
///     .capacity(32_usize)
///     .build()
///     .dispatcher()?;
/// # Ok(())
/// # }
/// ```
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default, setter(into)))]
#[builder(builder_method(doc = "
Create a builder for building `DispatcherBuilder`.

On the builder call, call methods with same name as its fields to set their values.

Finally, call `.build()` to create the instance of `DispatcherBuilder`.
"))]
pub struct DispatcherBuilder {
    /// Minimum interval between two admissions.
    ///
    /// Exactly one queued item is admitted per interval. Admitted items run
    /// concurrently, so this bounds the request *rate*, not the number of
    /// requests in flight.
    #[builder(default = DEFAULT_INTERVAL)]
    interval: Duration,
    /// Number of work items that may wait for admission before submitters
    /// have to wait for a free slot.
    #[builder(default = DEFAULT_CAPACITY)]
    capacity: usize,
    /// Total timeout of a single HTTP call.
    ///
    /// Unset by default: calls may take as long as the server needs.
    timeout: Option<Duration>,
    /// Timeout for establishing a connection.
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    connect_timeout: Duration,
    /// User-agent used for all requests.
    #[builder(default = DEFAULT_USER_AGENT.to_string())]
    user_agent: String,
    /// Headers sent with every request.
    custom_headers: HeaderMap,
    /// Hook applied to the `reqwest` client builder right before the client
    /// is built. Ignored when [`DispatcherBuilder::client`] is set.
    #[builder(setter(strip_option))]
    configure: Option<ClientHook>,
    /// A ready-made HTTP client. When set, every other client option of
    /// this builder is ignored.
    #[builder(setter(strip_option))]
    client: Option<reqwest::Client>,
}

impl Default for DispatcherBuilder {
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl From<DispatcherConfig> for DispatcherBuilder {
    fn from(config: DispatcherConfig) -> Self {
        Self::builder()
            .interval(config.interval)
            .capacity(config.capacity)
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent)
            .custom_headers(config.headers)
            .build()
    }
}

impl DispatcherBuilder {
    /// Instantiates a [`Dispatcher`] in the `Created` state.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if:
    /// - The interval or the capacity is zero.
    /// - The user-agent is invalid.
    /// - The request client cannot be created.
    ///   See [here](https://docs.rs/reqwest/latest/reqwest/struct.ClientBuilder.html#errors).
    pub fn dispatcher(self) -> Result<Dispatcher> {
        config::validate(self.interval, self.capacity)?;

        let client = match self.client {
            Some(ref client) => client.clone(),
            None => self.http_client()?,
        };

        Ok(Dispatcher::new(client, self.interval, self.capacity))
    }

    fn http_client(&self) -> Result<reqwest::Client> {
        let mut headers = self.custom_headers.clone();
        headers.insert(header::USER_AGENT, HeaderValue::from_str(&self.user_agent)?);

        let builder = reqwest::ClientBuilder::new()
            .gzip(true)
            .default_headers(headers)
            .connect_timeout(self.connect_timeout)
            .tcp_keepalive(DEFAULT_TCP_KEEPALIVE);

        let builder = match self.timeout {
            Some(t) => builder.timeout(t),
            None => builder,
        };

        let builder = match &self.configure {
            Some(hook) => hook.apply(builder),
            None => builder,
        };

        builder.build().map_err(ErrorKind::BuildClient)
    }
}
