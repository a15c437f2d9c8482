#![allow(unreachable_pub)]

mod error;
mod group;
mod response;
mod ticket;

pub use error::ErrorKind;
pub use group::{GroupOutcome, RequestGroup};
pub use response::FetchedResponse;
pub(crate) use ticket::Reply;
pub use ticket::Ticket;

/// The dispatcher `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
