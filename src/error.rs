use std::path::PathBuf;
use thiserror::Error;

/// Errors raised before any clustering happens.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Failure to read query-log records. Always fatal: a partial record list is never clustered.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("could not read {origin}: {source}")]
    Io {
        origin: Origin,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record in {origin} at line {line}: {source}")]
    Malformed {
        origin: Origin,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Where a record stream came from, for error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Stdin,
    File(PathBuf),
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Stdin => write!(f, "<stdin>"),
            Origin::File(path) => write!(f, "{}", path.display()),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
