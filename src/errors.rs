use crate::driver::DriverError;
use std::fmt::Display;
use thiserror::Error;

type Source = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse classification shared by every `DbError` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Internal,
    Timeout,
}

/// Errors returned by the persistence adapter.
///
/// Every variant records the operation that produced it (`location`) plus free-form
/// diagnostic `details` (compiled filters, options, object identities) so that a failure
/// can be understood from the log line alone.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("{location}: {message}")]
    NotFound {
        location: &'static str,
        message: String,
        details: Vec<String>,
        #[source]
        source: Option<Source>,
    },

    #[error("{location}: {message}")]
    BadRequest {
        location: &'static str,
        message: String,
        details: Vec<String>,
        #[source]
        source: Option<Source>,
    },

    #[error("{location}: {message}")]
    Internal {
        location: &'static str,
        message: String,
        details: Vec<String>,
        #[source]
        source: Option<Source>,
    },

    /// Slow-operation diagnostic. Reported through the log, never returned by an operation.
    #[error("{location}: {message}")]
    Timeout {
        location: &'static str,
        message: String,
        details: Vec<String>,
        #[source]
        source: Option<Source>,
    },
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    fn build(kind: ErrorKind, location: &'static str, message: String) -> Self {
        let details = Vec::new();
        let source = None;
        match kind {
            ErrorKind::NotFound => Self::NotFound { location, message, details, source },
            ErrorKind::BadRequest => Self::BadRequest { location, message, details, source },
            ErrorKind::Internal => Self::Internal { location, message, details, source },
            ErrorKind::Timeout => Self::Timeout { location, message, details, source },
        }
    }

    pub fn not_found(location: &'static str, message: impl Into<String>) -> Self {
        Self::build(ErrorKind::NotFound, location, message.into())
    }

    pub fn bad_request(location: &'static str, message: impl Into<String>) -> Self {
        Self::build(ErrorKind::BadRequest, location, message.into())
    }

    pub fn internal(location: &'static str, message: impl Into<String>) -> Self {
        Self::build(ErrorKind::Internal, location, message.into())
    }

    pub fn timeout(location: &'static str, message: impl Into<String>) -> Self {
        Self::build(ErrorKind::Timeout, location, message.into())
    }

    /// Wraps `inner` under a new location while keeping its kind.
    pub fn wrap(inner: Self, location: &'static str, message: impl Into<String>) -> Self {
        let kind = inner.kind();
        Self::build(kind, location, message.into()).with_source(inner)
    }

    /// Maps a driver failure to `Internal`.
    pub fn from_driver(location: &'static str, message: impl Into<String>, err: DriverError) -> Self {
        Self::internal(location, message).with_source(err)
    }

    /// Maps a failed write: rejections reported by the server are the caller's fault
    /// (`BadRequest`), anything else is `Internal`.
    pub fn from_write(location: &'static str, message: impl Into<String>, err: DriverError) -> Self {
        let kind = if err.is_write_rejection() { ErrorKind::BadRequest } else { ErrorKind::Internal };
        Self::build(kind, location, message.into()).with_source(err)
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Display) -> Self {
        self.details_mut().push(detail.to_string());
        self
    }

    #[must_use]
    pub fn with_details<I, D>(mut self, details: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Display,
    {
        self.details_mut().extend(details.into_iter().map(|d| d.to_string()));
        self
    }

    #[must_use]
    pub fn with_source(mut self, err: impl std::error::Error + Send + Sync + 'static) -> Self {
        let slot = match &mut self {
            Self::NotFound { source, .. }
            | Self::BadRequest { source, .. }
            | Self::Internal { source, .. }
            | Self::Timeout { source, .. } => source,
        };
        *slot = Some(Box::new(err));
        self
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::BadRequest { .. } => ErrorKind::BadRequest,
            Self::Internal { .. } => ErrorKind::Internal,
            Self::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    #[must_use]
    pub const fn location(&self) -> &'static str {
        match self {
            Self::NotFound { location, .. }
            | Self::BadRequest { location, .. }
            | Self::Internal { location, .. }
            | Self::Timeout { location, .. } => location,
        }
    }

    #[must_use]
    pub fn details(&self) -> &[String] {
        match self {
            Self::NotFound { details, .. }
            | Self::BadRequest { details, .. }
            | Self::Internal { details, .. }
            | Self::Timeout { details, .. } => details,
        }
    }

    fn details_mut(&mut self) -> &mut Vec<String> {
        match self {
            Self::NotFound { details, .. }
            | Self::BadRequest { details, .. }
            | Self::Internal { details, .. }
            | Self::Timeout { details, .. } => details,
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub const fn is_bad_request(&self) -> bool {
        matches!(self, Self::BadRequest { .. })
    }

    /// First `DriverError` found while walking the source chain, if any.
    #[must_use]
    pub fn driver_error(&self) -> Option<&DriverError> {
        let mut current: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(self);
        while let Some(err) = current {
            if let Some(driver) = err.downcast_ref::<DriverError>() {
                return Some(driver);
            }
            current = err.source();
        }
        None
    }

    /// True when the failure was caused by an expired or cancelled context.
    #[must_use]
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self.driver_error(), Some(DriverError::Timeout | DriverError::Cancelled))
    }

    /// One-line rendering with details and the full source chain, used for log output.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        let mut out = self.to_string();
        for d in self.details() {
            out.push_str(" | ");
            out.push_str(d);
        }
        let mut current = std::error::Error::source(self);
        while let Some(err) = current {
            out.push_str(" <- ");
            out.push_str(&err.to_string());
            current = err.source();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_keeps_kind_and_chains_source() {
        let inner = DbError::not_found("inner", "missing").with_detail("filter: {}");
        let outer = DbError::wrap(inner, "outer", "lookup failed");
        assert_eq!(outer.kind(), ErrorKind::NotFound);
        assert_eq!(outer.location(), "outer");
        assert!(outer.diagnostic().contains("inner: missing"));
    }

    #[test]
    fn write_rejection_is_bad_request() {
        let err = DbError::from_write(
            "save",
            "insert failed",
            DriverError::Write { code: 11000, message: "duplicate key".into() },
        );
        assert!(err.is_bad_request());
        let err = DbError::from_write("save", "insert failed", DriverError::Disconnected);
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn driver_error_is_found_through_wrapping() {
        let err = DbError::from_driver("count", "unable to count", DriverError::Timeout);
        let err = DbError::wrap(err, "outer", "failed");
        assert!(err.is_deadline_exceeded());
    }
}
