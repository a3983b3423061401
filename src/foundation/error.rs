pub type SeqResult<T> = Result<T, SeqError>;

#[derive(thiserror::Error, Debug)]
pub enum SeqError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("processing error: {0}")]
    Processing(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SeqError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn processing(msg: impl Into<String>) -> Self {
        Self::Processing(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}

impl From<serde_json::Error> for SeqError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e.to_string())
    }
}
