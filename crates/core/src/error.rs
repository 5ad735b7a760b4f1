use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("timestamp out of range: {0}")]
    Timestamp(String),
}

pub type Result<T> = std::result::Result<T, SynthError>;
