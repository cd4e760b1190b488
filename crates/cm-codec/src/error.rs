/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("document has no frontmatter header")]
    NoHeader,

    #[error("malformed frontmatter header: {reason}")]
    InvalidHeader { reason: String },

    #[error("frontmatter is missing the id field")]
    MissingId,

    #[error("failed to serialize frontmatter: {reason}")]
    Emit { reason: String },
}

impl CodecError {
    pub fn is_retryable(&self) -> bool {
        false
    }
}
