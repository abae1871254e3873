use thiserror::Error;

/// The error kinds named in the system's error-handling design (§7): not
/// concrete HTTP types, since routing is explicitly out of scope, but a
/// closed vocabulary a boundary layer can map onto status codes.
#[derive(Debug, Error)]
pub enum AigentError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("provider not ready: {0}")]
    ProviderNotReady(String),

    #[error("provider exhausted: {0}")]
    ProviderExhausted(String),

    /// A DB hiccup, a momentary Redis failure, a transport blip — logged and,
    /// at idempotent call sites, retried with bounded attempts. Non-idempotent
    /// operations surface this directly rather than silently retrying.
    #[error("transient internal error: {0}")]
    TransientInternal(String),

    /// Configuration or invariant violation severe enough that the process
    /// should log and exit rather than attempt to continue.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl AigentError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Self::QuotaExceeded(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientInternal(msg.into())
    }

    /// True for the errors the error-handling design calls out as "never
    /// retried" (`InvalidInput`, `Unauthorized`, `Forbidden`, `NotFound`).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_) | Self::Unauthorized | Self::Forbidden | Self::NotFound
        )
    }
}
