use crate::Type;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The crate's error type.
#[derive(Error, Debug)]
pub enum Error {
    /// The 12 byte header was short, or carried an invalid opcode or response code.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// The message could not be decoded, or did not correlate with the query
    /// that produced it.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Zone(#[from] ZoneError),

    #[cfg(feature = "http_deps")]
    #[error(transparent)]
    Http(#[from] http::Error),

    #[cfg(feature = "http_deps")]
    #[error(transparent)]
    Hyper(#[from] hyper::Error),

    #[cfg(feature = "http_deps")]
    #[error(transparent)]
    Uri(#[from] http::uri::InvalidUri),

    #[cfg(feature = "http_deps")]
    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[cfg(feature = "tls")]
    #[error(transparent)]
    Tls(#[from] rustls::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Returns true if this error means the connection that produced it can
    /// no longer be trusted, and should be re-established.
    pub fn is_connection_error(&self) -> bool {
        !matches!(self, Error::Validation(_) | Error::InvalidArgument(_))
    }
}

/// A record failed the field checks performed before it is packed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {r#type} record: {field}: {reason}")]
pub struct ValidationError {
    pub r#type: Type,
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub(crate) fn new(r#type: Type, field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError {
            r#type,
            field,
            reason: reason.into(),
        }
    }
}

/// A zone file could not be parsed. Rendered as `file:line: reason`.
#[derive(Error, Debug)]
pub struct ZoneError {
    pub file: PathBuf,
    pub line: usize,
    pub reason: String,

    /// Set when the failure happened inside an `$INCLUDE`d file.
    #[source]
    pub inner: Option<Box<ZoneError>>,
}

impl ZoneError {
    pub(crate) fn new(file: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        ZoneError {
            file: file.into(),
            line,
            reason: reason.into(),
            inner: None,
        }
    }

    /// Wraps an error from an included file with the position of the `$INCLUDE`.
    pub(crate) fn included(file: impl Into<PathBuf>, line: usize, inner: ZoneError) -> Self {
        ZoneError {
            file: file.into(),
            line,
            reason: format!("in $INCLUDE: {}", inner),
            inner: Some(Box::new(inner)),
        }
    }
}

impl fmt::Display for ZoneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.file.display(), self.line, self.reason)
    }
}

/// Returns early with a [`std::io::Error`] of the given [`std::io::ErrorKind`].
///
/// ```ignore
/// bail!(InvalidData, "label longer than {} bytes", 63);
/// ```
#[macro_export]
#[doc(hidden)]
macro_rules! bail {
    ($kind:ident, $($arg:tt)*) => {
        return Err(::std::io::Error::new(
            ::std::io::ErrorKind::$kind,
            format!($($arg)*),
        ).into())
    };
}
