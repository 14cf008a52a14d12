//! Error types for beatline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Format error: {0}")]
    Format(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Precondition error: {0}")]
    Precondition(String),

    #[error("Concurrency error: {0}")]
    Concurrency(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Resample error: {0}")]
    Resample(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AudioError>;
