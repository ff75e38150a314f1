use thiserror::Error;

/// Every way a submit or reveal can fail.
///
/// Display strings other than `StoreUnavailable` reach HTTP clients verbatim
/// and must not carry cryptographic or storage detail.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VaultError {
    #[error("secret must be between {min} and {max} characters")]
    InvalidPayload { min: usize, max: usize },

    #[error("ttl_seconds must be between {min} and {max}")]
    InvalidTtl { min: u64, max: u64 },

    #[error("not found or expired")]
    NotFoundOrExpired,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("secure random source unavailable")]
    GenerationExhaustion,

    /// Underlying store error. The message is for logs only.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<redb::Error> for VaultError {
    fn from(e: redb::Error) -> Self {
        Self::StoreUnavailable(e.to_string())
    }
}
