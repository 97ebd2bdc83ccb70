use thiserror::Error;

/// Longest slice of an upstream error body kept in [`Error::Status`].
const MAX_BODY_EXCERPT: usize = 200;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("invalid JSON from {endpoint}: {source}")]
    Json {
        endpoint: &'static str,
        #[source]
        source: sonic_rs::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("histogram error: {0}")]
    Histogram(#[from] hdrhistogram::CreationError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn status(endpoint: &'static str, status: u16, body: &str) -> Self {
        Error::Status {
            endpoint,
            status,
            body: body.chars().take(MAX_BODY_EXCERPT).collect(),
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// HTTP status carried by the error, if the upstream answered at all.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Error::Status { status, .. } => Some(*status),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
