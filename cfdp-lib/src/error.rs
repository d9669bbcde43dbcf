#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Not enough bytes")]
    NotEnoughData { actual: usize, minimum: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A write would exceed the capacity of a fixed size buffer.
    #[error("buffer overrun: capacity {capacity}, attempted {attempted}")]
    Overrun { capacity: usize, attempted: usize },

    #[error("Invalid timecode config: {0}")]
    TimecodeConfig(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read config: {0}")]
    ConfigFormat(#[from] serde_json::Error),

    /// Encoding or decoding a binary event envelope failed.
    #[error("envelope error: {0}")]
    Envelope(String),

    #[error("bus error: {0}")]
    Bus(String),
}

pub type Result<T> = std::result::Result<T, Error>;
