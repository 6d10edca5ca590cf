use std::fmt::Display;

/// Errors surfaced by the table cache and the map build path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The requested key or entry does not exist.
    NotFound,
    /// The operation could not complete without I/O and the caller asked
    /// for a cache-only read.
    Incomplete(String),
    /// Malformed on-disk data: a bad map entry, an unknown flag bit, or a
    /// link target missing from the dependence map.
    Corruption(String),
    /// The caller passed something the API cannot act on.
    InvalidArgument(String),
    /// An I/O error from the environment.
    Io(String),
    /// The configured space quota was exhausted while writing an output file.
    SpaceLimit(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::NotFound => write!(f, "not found"),
            Error::Incomplete(msg) => write!(f, "incomplete: {msg}"),
            Error::Corruption(msg) => write!(f, "corruption: {msg}"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
            Error::SpaceLimit(msg) => write!(f, "space limit: {msg}"),
        }
    }
}

impl Error {
    /// True for errors that indicate on-disk or in-memory data damage.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    /// True for the cache-only miss produced under
    /// [`ReadTier::BlockCacheOnly`](crate::config::ReadTier::BlockCacheOnly).
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Error::Incomplete(_))
    }
}

/// A Result returning [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// Constructs an `Error::Corruption` for the given format string.
#[macro_export]
macro_rules! corruption {
    ($($args:tt)*) => { $crate::error::Error::Corruption(format!($($args)*)) };
}
