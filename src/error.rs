use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("file name does not match the naming convention: {0}")]
    InvalidNamingConvention(String),

    #[error("file content is unreadable: {0}")]
    UnreadableContent(String),

    #[error("CSV parsing failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EtlError>;
