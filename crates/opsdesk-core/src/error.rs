use thiserror::Error;

/// Canonical error type for access-control and audit operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Entity id does not resolve.
    #[error("{entity} `{id}` was not found")]
    NotFound {
        /// Entity type name (e.g. `"role"`).
        entity: &'static str,
        /// Identifier of the missing entity.
        id: String,
    },

    /// Uniqueness violation on a name or a (resource, action) pair.
    #[error("{entity} `{id}` already exists")]
    AlreadyExists {
        /// Entity type name (e.g. `"permission"`).
        entity: &'static str,
        /// Value that collides.
        id: String,
    },

    /// The operation is blocked by a referential-integrity rule.
    #[error("conflict: {message}")]
    Conflict {
        /// Human-readable explanation of the block.
        message: String,
    },

    /// Input is malformed or empty.
    #[error("bad request: {message}")]
    BadRequest {
        /// Human-readable explanation of what is wrong with the input.
        message: String,
    },

    /// The caller is not allowed to perform the operation.
    #[error("forbidden: {message}")]
    Forbidden {
        /// Human-readable denial reason.
        message: String,
    },

    /// The caller's deadline elapsed before the mutation committed.
    #[error("operation cancelled: {message}")]
    Cancelled {
        /// Which operation was abandoned.
        message: String,
    },

    /// Unexpected storage or internal failure.
    #[error("internal error: {message}")]
    Internal {
        /// Details for operators. Storage errors are logged, not copied here.
        message: String,
    },
}

/// Error classification used by outer layers to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Conflict,
    BadRequest,
    Forbidden,
    Cancelled,
    Internal,
}

impl CoreError {
    /// Creates a `NotFound` variant.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates an `AlreadyExists` variant.
    #[must_use]
    pub fn already_exists(entity: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.into(),
        }
    }

    /// Creates a `Conflict` variant.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a `BadRequest` variant.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Creates a `Forbidden` variant.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a `Cancelled` variant.
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the taxonomy kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::BadRequest { .. } => ErrorKind::BadRequest,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("snapshot serialization failed: {err}"))
    }
}

/// Convenient result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
