/// Memory store errors. This is the surface the command layer sees.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("memory not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid regex: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("codec error: {0}")]
    Codec(#[from] cm_codec::CodecError),

    #[error("storage error: {0}")]
    Storage(#[from] cm_storage::StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("memory store is closed")]
    Closed,

    #[error("memory store is read-only")]
    ReadOnly,
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }
}
