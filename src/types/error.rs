use std::path::PathBuf;

use thiserror::Error;
use tokio::runtime::TryCurrentError;

/// Possible errors when dispatching requests through a
/// [`Dispatcher`](crate::Dispatcher)
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The dispatcher does not accept work: it was never started, it is
    /// shutting down, or it has already stopped.
    ///
    /// Items still waiting in the queue at shutdown are resolved with this
    /// error as well. Callers should stop submitting.
    #[error("Dispatcher is closed")]
    Closed,
    /// The underlying HTTP call failed
    #[error("Network error while executing request: {0}")]
    Transport(#[source] reqwest::Error),
    /// The body of a request group response could not be read
    #[error("Failed to read response body: {0}")]
    ReadBody(#[source] reqwest::Error),
    /// A step of a request group failed. None of the responses received
    /// before the failing step are handed out.
    #[error("Request group aborted at step {step}: {source}")]
    GroupAborted {
        /// Zero-based index of the failing step
        step: usize,
        /// The error of the failing step
        #[source]
        source: Box<ErrorKind>,
    },
    /// The request group did not produce a first request
    #[error("Request group produced no request")]
    EmptyGroup,
    /// `start` was called on a dispatcher which is not freshly created
    #[error("Dispatcher was already started")]
    AlreadyStarted,
    /// `start` was called outside of a Tokio runtime
    #[error("Dispatcher must be started from within a Tokio runtime: {0}")]
    NoRuntime(#[from] TryCurrentError),
    /// The underlying HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    BuildClient(#[source] reqwest::Error),
    /// The given configuration cannot be used to build a dispatcher
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// The given header could not be parsed.
    /// A possible error when converting a `HeaderValue` from a string.
    #[error("Header could not be parsed: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
    /// A response body could not be decoded as JSON
    #[error("Failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
    /// The configuration file could not be read
    #[error("Failed to read config file `{path}`: {err}", path = .0.display(), err = .1)]
    ConfigFile(PathBuf, #[source] std::io::Error),
    /// The configuration file is not valid TOML
    #[error("Failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ErrorKind {
    /// Returns `true` if the error signals that the dispatcher is closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// The transport error that ultimately caused this error, if any.
    ///
    /// For [`ErrorKind::GroupAborted`] this looks through to the error of
    /// the failing step.
    #[must_use]
    pub fn transport_error(&self) -> Option<&reqwest::Error> {
        match self {
            Self::Transport(e) | Self::ReadBody(e) => Some(e),
            Self::GroupAborted { source, .. } => source.transport_error(),
            _ => None,
        }
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Transport(e1), Self::Transport(e2))
            | (Self::ReadBody(e1), Self::ReadBody(e2))
            | (Self::BuildClient(e1), Self::BuildClient(e2)) => e1.to_string() == e2.to_string(),
            (
                Self::GroupAborted {
                    step: s1,
                    source: e1,
                },
                Self::GroupAborted {
                    step: s2,
                    source: e2,
                },
            ) => s1 == s2 && e1 == e2,
            (Self::InvalidConfig(m1), Self::InvalidConfig(m2)) => m1 == m2,
            (Self::ConfigFile(p1, e1), Self::ConfigFile(p2, e2)) => {
                p1 == p2 && e1.kind() == e2.kind()
            }
            (Self::Closed, Self::Closed)
            | (Self::InvalidHeader(_), Self::InvalidHeader(_))
            | (Self::EmptyGroup, Self::EmptyGroup)
            | (Self::AlreadyStarted, Self::AlreadyStarted)
            | (Self::NoRuntime(_), Self::NoRuntime(_)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorKind;

    #[test]
    fn test_group_aborted_display_names_step() {
        let err = ErrorKind::GroupAborted {
            step: 1,
            source: Box::new(ErrorKind::Closed),
        };
        assert_eq!(
            err.to_string(),
            "Request group aborted at step 1: Dispatcher is closed"
        );
        assert!(!err.is_closed());
        assert!(err.transport_error().is_none());
    }

    #[test]
    fn test_config_file_display_names_path() {
        let err = ErrorKind::ConfigFile(
            "/etc/dispatcher.toml".into(),
            std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        );
        assert_eq!(
            err.to_string(),
            "Failed to read config file `/etc/dispatcher.toml`: not found"
        );
    }

    #[test]
    fn test_equality_ignores_payload_identity() {
        assert_eq!(ErrorKind::Closed, ErrorKind::Closed);
        assert_eq!(
            ErrorKind::InvalidConfig("capacity".into()),
            ErrorKind::InvalidConfig("capacity".into())
        );
        assert_ne!(ErrorKind::Closed, ErrorKind::EmptyGroup);
    }
}
