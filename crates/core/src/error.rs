//! Semantic error taxonomy.
//!
//! Every fallible operation in the service reports an [`Error`] carrying a
//! [`Kind`], an optional human-readable message, and an optional cause. The
//! kind is what the API layer maps to an HTTP status and what the worker uses
//! to decide between retry, snooze, and cancel, so matching must see through
//! wrapping: [`Error::is`] walks the whole cause chain.

use std::error::Error as StdError;
use std::fmt;

/// Boxed cause stored inside an [`Error`].
pub type Cause = Box<dyn StdError + Send + Sync + 'static>;

/// Semantic category of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// The requested entity does not exist (or belongs to another user).
    NotFound,
    /// Missing or invalid authentication.
    Unauthorized,
    /// Authenticated but not allowed to perform the operation.
    Forbidden,
    /// The client sent invalid data.
    BadRequest,
    /// State conflict, e.g. no pending scans remain for a queued URL.
    Conflict,
    /// Any other failure; logged in full, surfaced generically.
    Internal,
    /// The operation timed out.
    Timeout,
    /// The service or an upstream is temporarily unavailable.
    Unavailable,
    /// The upstream provider reported too many requests.
    RateLimited,
}

impl Kind {
    /// Wire name of the kind, used as the `code` field of API error bodies.
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::NotFound => "NOT_FOUND",
            Kind::Unauthorized => "UNAUTHORIZED",
            Kind::Forbidden => "FORBIDDEN",
            Kind::BadRequest => "BAD_REQUEST",
            Kind::Conflict => "CONFLICT",
            Kind::Internal => "INTERNAL",
            Kind::Timeout => "TIMEOUT",
            Kind::Unavailable => "UNAVAILABLE",
            Kind::RateLimited => "RATE_LIMITED",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A kind-tagged error with an optional message and cause.
#[derive(Debug)]
pub struct Error {
    kind: Kind,
    message: Option<String>,
    source: Option<Cause>,
}

impl Error {
    /// Build an error with a kind and a message.
    pub fn new(kind: Kind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
            source: None,
        }
    }

    /// Build an error carrying only a kind.
    pub fn kind_only(kind: Kind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Wrap a cause with a kind and a message.
    pub fn wrap(
        kind: Kind,
        source: impl StdError + Send + Sync + 'static,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: Some(message.into()),
            source: Some(Box::new(source)),
        }
    }

    /// Shorthand for wrapping infrastructure failures as [`Kind::Internal`].
    pub fn internal(
        source: impl StdError + Send + Sync + 'static,
        message: impl Into<String>,
    ) -> Self {
        Self::wrap(Kind::Internal, source, message)
    }

    /// The kind attached directly to this error.
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// The message attached to this error, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Whether this error, or any semantic error in its cause chain, carries
    /// the given kind.
    pub fn is(&self, kind: Kind) -> bool {
        if self.kind == kind {
            return true;
        }
        let mut cur: Option<&(dyn StdError + 'static)> = self
            .source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static));
        while let Some(err) = cur {
            if let Some(sem) = err.downcast_ref::<Error>() {
                if sem.kind == kind {
                    return true;
                }
            }
            cur = err.source();
        }
        false
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.message, &self.source) {
            (Some(msg), Some(src)) => write!(f, "{msg}: {src}"),
            (Some(msg), None) => f.write_str(msg),
            (None, Some(src)) => write!(f, "{src}"),
            (None, None) => f.write_str(self.kind.as_str()),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// Convenience alias for results carrying a semantic [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
