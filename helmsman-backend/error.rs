/// Errors crossing component boundaries.
///
/// Services return these instead of letting failures bubble as panics or
/// stringly-typed anyhow chains; the REST layer maps each variant onto a
/// status code in `api::error`. `TokenInvalid`/`TokenExpired` deliberately
/// carry no credential identity.
#[derive(thiserror::Error, Debug)]
pub enum ControlError {
    #[error("{0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{0}")]
    Conflict(String),

    /// A remote transfer, shell, or child process failed. Message carries
    /// the truncated tool output.
    #[error("{0}")]
    Remote(String),

    #[error("operation timed out after {0}s")]
    Timeout(u64),

    #[error("invalid token")]
    TokenInvalid,

    #[error("token expired")]
    TokenExpired,

    #[error("decryption failed")]
    Decrypt,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl ControlError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;
