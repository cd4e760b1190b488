/// Errors from cm-core conversions.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid scope value: {value}")]
    InvalidScope { value: String },

    #[error("invalid status value: {value}")]
    InvalidStatus { value: String },
}

impl CoreError {
    pub fn is_retryable(&self) -> bool {
        false
    }
}
