//! Error taxonomy shared by every handle.

/// Errors produced by handles and their decorators.
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    /// Resumable failure: every byte before `offset` was transferred.
    #[error("transfer interrupted, resume from byte {offset}")]
    Restart { offset: u64 },

    /// The caller broke the handle contract.
    #[error("contract violation: {0}")]
    Contract(String),

    #[error("{op} not supported by {handle}")]
    NotSupported { op: &'static str, handle: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HandleError {
    /// Builds a [`HandleError::NotSupported`] for `handle`.
    pub fn not_supported(op: &'static str, handle: impl Into<String>) -> Self {
        Self::NotSupported {
            op,
            handle: handle.into(),
        }
    }

    /// Offset to resume from, if this failure is resumable.
    pub fn resume_offset(&self) -> Option<u64> {
        match self {
            Self::Restart { offset } => Some(*offset),
            _ => None,
        }
    }

    /// Returns `true` for misuse of the API (never retried).
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::Contract(_) | Self::NotSupported { .. })
    }
}

/// Fails with [`HandleError::Contract`] unless `cond` holds.
#[macro_export]
macro_rules! ensure_contract {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::HandleError::Contract(format!($($arg)+)));
        }
    };
}
