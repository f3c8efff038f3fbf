//! Error types shared by the facade and every backend

use confdb_schema::ParseValueError;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Boxed source of a system-level failure
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Flat discriminant of [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    NotAllowed,
    NotValid,
    BadQuery,
    System,
    Generic,
}

#[derive(Debug, Error)]
pub enum Error {
    /// Class, object, attribute, relationship, include or version does not exist
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Forbidden by permissions or by a structural policy
    #[error("not allowed: {0}")]
    NotAllowed(String),

    /// Stale handle or a value rejected by schema validation
    #[error("not valid: {0}")]
    NotValid(String),

    #[error("bad query: {0}")]
    BadQuery(String),

    /// I/O, connectivity or other backend-internal failure
    #[error("system error: {message}")]
    System {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("{0}")]
    Generic(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::NotAllowed(_) => ErrorKind::NotAllowed,
            Error::NotValid(_) => ErrorKind::NotValid,
            Error::BadQuery(_) => ErrorKind::BadQuery,
            Error::System { .. } => ErrorKind::System,
            Error::Generic(_) => ErrorKind::Generic,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound(message.into())
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Error::AlreadyExists(message.into())
    }

    pub fn not_allowed(message: impl Into<String>) -> Self {
        Error::NotAllowed(message.into())
    }

    pub fn not_valid(message: impl Into<String>) -> Self {
        Error::NotValid(message.into())
    }

    pub fn bad_query(message: impl Into<String>) -> Self {
        Error::BadQuery(message.into())
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Error::Generic(message.into())
    }

    pub fn system(message: impl Into<String>) -> Self {
        Error::System {
            message: message.into(),
            source: None,
        }
    }

    /// System error keeping the underlying cause
    pub fn system_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::System {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::PermissionDenied => Error::NotAllowed(e.to_string()),
            io::ErrorKind::AlreadyExists => Error::AlreadyExists(e.to_string()),
            io::ErrorKind::NotFound => Error::NotFound(e.to_string()),
            _ => Error::system_with("I/O failure", e),
        }
    }
}

impl From<ParseValueError> for Error {
    fn from(e: ParseValueError) -> Self {
        Error::NotValid(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            Error::not_found("object 'A@Foo'").to_string(),
            "not found: object 'A@Foo'"
        );
        assert_eq!(Error::generic("oops").to_string(), "oops");
        assert_eq!(
            Error::system("disk on fire").to_string(),
            "system error: disk on fire"
        );
    }

    #[test]
    fn test_io_kind_mapping() {
        let denied: Error = io::Error::new(io::ErrorKind::PermissionDenied, "ro").into();
        assert_eq!(denied.kind(), ErrorKind::NotAllowed);

        let missing: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let other: Error = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert_eq!(other.kind(), ErrorKind::System);
        assert!(std::error::Error::source(&other).is_some());
    }

    #[test]
    fn test_value_errors_are_not_valid() {
        let err: Error = ParseValueError::InvalidBool("maybe".into()).into();
        assert_eq!(err.kind(), ErrorKind::NotValid);
    }
}
