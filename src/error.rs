use snafu::Snafu;

use crate::keypool::KeyPoolStatus;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Resource not found: {resource}"))]
    NotFound { resource: String },

    #[snafu(display("Internal server error"))]
    InternalServerError {
        #[snafu(source(false))]
        source: Option<eyre::Report>,
    },

    #[snafu(display("Error returned from database: {source}"))]
    Sqlx {
        #[snafu(source)]
        source: sqlx::Error,
    },

    #[snafu(display("Error running migrations"))]
    MigrationError {
        #[snafu(source)]
        source: sqlx::migrate::MigrateError,
    },

    #[snafu(display("unsupported algorithm: {algorithm}"))]
    UnsupportedAlgorithm { algorithm: String },

    #[snafu(display("provider not supported yet; use Internal for now"))]
    UnsupportedProvider { provider: String },

    #[snafu(display("key pool status {status} does not allow {operation}"))]
    InvalidStatus {
        status: KeyPoolStatus,
        operation: &'static str,
    },

    #[snafu(display("invalid key pool status transition from {from} to {to}"))]
    InvalidStatusTransition {
        from: KeyPoolStatus,
        to: KeyPoolStatus,
    },

    #[snafu(display("write attempted in a read-only transaction"))]
    ReadOnlyTransaction,

    #[snafu(display("JOSE error: {message}"))]
    Jose { message: String },

    #[snafu(display("value pool {pool} is closed"))]
    PoolClosed { pool: String },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(eyre::Report, Some)))]
        source: Option<eyre::Report>,
    },

    #[snafu(display("Invalid parameter: {message}"))]
    InvalidParameter { message: String },

    #[snafu(display("{message}: {source}"))]
    Context {
        message: String,
        #[snafu(source)]
        source: Box<Error>,
    },
}

impl From<sqlx::Error> for Error {
    fn from(source: sqlx::Error) -> Self {
        Self::Sqlx { source }
    }
}

impl From<eyre::Report> for Error {
    fn from(e: eyre::Report) -> Self {
        Self::InternalServerError { source: Some(e) }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::InternalServerError {
            source: Some(e.into()),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::InternalServerError {
            source: Some(e.into()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(source: sqlx::migrate::MigrateError) -> Self {
        Self::MigrationError { source }
    }
}

impl Error {
    pub fn internal(e: impl Into<eyre::Report>) -> Self {
        Self::InternalServerError {
            source: Some(e.into()),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    pub fn unsupported_algorithm(algorithm: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm {
            algorithm: algorithm.into(),
        }
    }

    pub fn jose(message: impl Into<String>) -> Self {
        Self::Jose {
            message: message.into(),
        }
    }

    pub fn pool_closed(pool: impl Into<String>) -> Self {
        Self::PoolClosed { pool: pool.into() }
    }

    pub fn key_pool_not_found(key_pool_id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            resource: format!("key pool {key_pool_id}"),
        }
    }

    pub fn key_not_found(key_pool_id: impl std::fmt::Display, key_id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            resource: format!("key {key_id} in key pool {key_pool_id}"),
        }
    }

    /// Wraps this error with a message describing what was being attempted.
    pub fn context(self, message: impl Into<String>) -> Self {
        Self::Context {
            message: message.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping every [`Error::Context`] layer.
    pub fn root(&self) -> &Error {
        let mut current = self;
        while let Self::Context { source, .. } = current {
            current = source;
        }
        current
    }
}

/// Adds context to fallible results, in the spirit of `eyre::WrapErr`.
pub trait WrapErr<T> {
    fn wrap_err(self, message: impl Into<String>) -> Result<T, Error>;

    fn wrap_err_with<M, F>(self, f: F) -> Result<T, Error>
    where
        M: Into<String>,
        F: FnOnce() -> M;
}

impl<T, E> WrapErr<T> for Result<T, E>
where
    E: Into<Error>,
{
    fn wrap_err(self, message: impl Into<String>) -> Result<T, Error> {
        self.map_err(|e| e.into().context(message))
    }

    fn wrap_err_with<M, F>(self, f: F) -> Result<T, Error>
    where
        M: Into<String>,
        F: FnOnce() -> M,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_renders_the_full_chain() {
        let err: Result<(), Error> = Err(Error::not_found("key pool 1"));
        let err = err
            .wrap_err("failed to get KeyPool")
            .wrap_err("failed to add key pool")
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "failed to add key pool: failed to get KeyPool: Resource not found: key pool 1"
        );
        assert!(matches!(err.root(), Error::NotFound { .. }));
    }

    #[test]
    fn root_of_unwrapped_error_is_itself() {
        let err = Error::ReadOnlyTransaction;
        assert!(matches!(err.root(), Error::ReadOnlyTransaction));
    }
}
