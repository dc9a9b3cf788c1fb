use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::cache::CacheError;
use crate::ldf::LdfError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced by the patch engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport or network failure. Re-invoking the same call may succeed.
    #[error("patches unavailable: {0}")]
    Unavailable(String),

    /// The patch server refused the configured patch token.
    #[error("invalid patch token")]
    Unauthorized,

    #[error("version {version} was rejected for server {server}")]
    Rejected { server: String, version: String },

    #[error("invalid version string: {0:?}")]
    InvalidVersion(String),

    #[error("path is not local to its base directory: {0:?}")]
    NonlocalPath(String),

    #[error("destination already exists: {0}")]
    Conflict(String),

    #[error("failed to decode manifest for {version}: {source}")]
    Manifest {
        version: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode boot configuration: {0}")]
    Ldf(#[from] LdfError),

    #[error("cyclic dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("{context}: {}: {source}", .path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed or unencodable JSON state on disk.
    #[error("{context}: {}: {source}", .path.display())]
    Json {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("resource cache: {0}")]
    Cache(#[from] CacheError),

    #[error("hash mismatch after transferring {0}")]
    IntegrityMismatch(String),

    #[error(transparent)]
    Multiple(#[from] ErrorList),
}

impl Error {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            context,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(
        context: &'static str,
        path: impl Into<PathBuf>,
        source: serde_json::Error,
    ) -> Self {
        Error::Json {
            context,
            path: path.into(),
            source,
        }
    }

    /// Only transport failures are worth offering a blind retry for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Unavailable(_))
    }
}

/// Several independent failures reported as one.
#[derive(Debug)]
pub struct ErrorList(Vec<Error>);

impl ErrorList {
    pub fn errors(&self) -> &[Error] {
        &self.0
    }

    pub fn into_errors(self) -> Vec<Error> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorList {}

/// Collapse a batch of failures: none is success, one is returned as-is,
/// more are wrapped in [`Error::Multiple`].
pub fn join(mut errors: Vec<Error>) -> Result<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(Error::Multiple(ErrorList(errors))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_empty_is_ok() {
        assert!(join(Vec::new()).is_ok());
    }

    #[test]
    fn test_join_single_is_unwrapped() {
        let err = join(vec![Error::Unauthorized]).unwrap_err();
        assert!(matches!(err, Error::Unauthorized));
    }

    #[test]
    fn test_join_many_keeps_every_cause() {
        let err = join(vec![
            Error::Conflict("a".into()),
            Error::NonlocalPath("../b".into()),
        ])
        .unwrap_err();
        let list = match err {
            Error::Multiple(list) => list,
            other => panic!("expected aggregate, got {other:?}"),
        };
        assert_eq!(list.len(), 2);
        let text = list.to_string();
        assert!(text.contains("destination already exists: a"));
        assert!(text.contains("../b"));
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(Error::Unavailable("timeout".into()).is_retryable());
        assert!(!Error::Unauthorized.is_retryable());
        assert!(!Error::InvalidVersion("x".into()).is_retryable());
    }
}
