use std::fmt;
use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error classes shared by the local and remote backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed URL, bad prefix configuration, or a bad operation argument.
    InvalidArgument,
    /// Local path absent and no creation was requested.
    NotFound,
    PermissionDenied,
    /// Underlying local I/O fault.
    Io,
    Timeout,
    /// Operation issued against a handle that is not open.
    InvalidState,
    /// Operation only meaningful on the backend that was not selected.
    Unsupported,
    /// Opaque passthrough of whatever the remote client reported.
    Remote,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::NotFound => "not found",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::Io => "I/O error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Remote => "remote error",
        };
        f.write_str(s)
    }
}

/// Status returned by every redirector operation.
///
/// `fatal` errors move the owning handle to its error state; the handle
/// must be closed before it can be used again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    fatal: bool,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            fatal: false,
        }
    }

    /// Mark this error as fatal to the handle that produced it.
    pub fn into_fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Remote, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// Wrap an I/O error with the operation/path that produced it.
    pub fn from_io(err: io::Error, context: impl fmt::Display) -> Self {
        let mut e = Error::from(err);
        e.message = format!("{context}: {}", e.message);
        e
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            io::ErrorKind::TimedOut => ErrorKind::Timeout,
            io::ErrorKind::InvalidInput => ErrorKind::InvalidArgument,
            _ => ErrorKind::Io,
        };
        let e = Error::new(kind, err.to_string());
        if kind == ErrorKind::Io {
            e.into_fatal()
        } else {
            e
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_normalize_by_kind() {
        let e = Error::from(io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(e.kind(), ErrorKind::NotFound);
        assert!(!e.is_fatal());

        let e = Error::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(e.kind(), ErrorKind::PermissionDenied);

        let e = Error::from(io::Error::from(io::ErrorKind::TimedOut));
        assert_eq!(e.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn raw_io_faults_are_fatal() {
        // EIO
        let e = Error::from(io::Error::from_raw_os_error(5));
        assert_eq!(e.kind(), ErrorKind::Io);
        assert!(e.is_fatal());
    }

    #[test]
    fn display_carries_kind_and_context() {
        let e = Error::from_io(io::Error::from(io::ErrorKind::NotFound), "open /mnt/x");
        let s = e.to_string();
        assert!(s.starts_with("not found: open /mnt/x"), "got {s}");
    }
}
