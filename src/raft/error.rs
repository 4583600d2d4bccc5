use thiserror::Error;

#[derive(Error, Debug)]
pub enum RaftError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unknown peer: {0}")]
    UnknownPeer(usize),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WireError {
    #[error("Message is not valid UTF-8")]
    NotUtf8,

    #[error("Expected 3 fields, got {0}")]
    FieldCount(usize),

    #[error("Unknown message kind: {0}")]
    UnknownKind(String),

    #[error("Invalid term: {0}")]
    InvalidTerm(String),

    #[error("Invalid sender id: {0}")]
    InvalidSender(String),
}
