//! `throttled-client` is a rate-limited HTTP request dispatcher.
//!
//! Requests are queued, admitted one per interval, and then executed
//! concurrently. Besides single requests, the dispatcher runs *request
//! groups*: sequences of dependent requests where each step is derived from
//! the previous response, such as a token exchange followed by a download.
//!
//! ```no_run
//! use std::time::Duration;
//! use throttled_client::{CountingWaitGroup, DispatcherBuilder, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let dispatcher = DispatcherBuilder::builder()
//!         .interval(Duration::from_millis(200))
//!         .capacity(10_usize)
//!         .build()
//!         .dispatcher()?;
//!     dispatcher.start()?;
//!
//!     let urls = ["https://example.com/a", "https://example.com/b"];
//!     let pending = CountingWaitGroup::new();
//!     pending.add(urls.len());
//!
//!     for url in urls {
//!         let dispatcher = dispatcher.clone();
//!         let pending = pending.clone();
//!         tokio::spawn(async move {
//!             if let Ok(request) = dispatcher.client().get(url).build() {
//!                 match dispatcher.execute(request).await {
//!                     Ok(response) => println!("{url}: {}", response.status()),
//!                     Err(e) => eprintln!("{url}: {e}"),
//!                 }
//!             }
//!             pending.done();
//!             println!("{} remaining", pending.count());
//!         });
//!     }
//!
//!     pending.wait().await;
//!     dispatcher.stop().await;
//!     Ok(())
//! }
//! ```
#![warn(missing_docs)]

mod client;
mod dispatcher;
mod types;

pub mod config;
pub mod waiter;
#[cfg(test)]
mod test_utils;

pub use client::{ClientHook, DispatcherBuilder};
pub use config::DispatcherConfig;
pub use dispatcher::{Dispatcher, State};
pub use types::*;
pub use waiter::CountingWaitGroup;
