//! Error taxonomy shared by the phrase table and the LM.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// I/O failure on an append log.
    #[error("storage: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Key-value engine failure.
    #[error("index: {0}")]
    Index(String),

    /// A record could not be decoded at the given offset.
    #[error("corrupted record at offset {offset}")]
    Corrupted { offset: u64 },

    /// A garbage-collection pass was abandoned because of shutdown.
    #[error("interrupted")]
    Interrupted,

    #[error("config: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub fn storage(message: impl Into<String>) -> Self {
        Error::Storage {
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_io(message: impl Into<String>, source: std::io::Error) -> Self {
        Error::Storage {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::storage_io("io error", e)
    }
}

macro_rules! index_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Error {
                fn from(e: $ty) -> Self {
                    Error::Index(e.to_string())
                }
            }
        )*
    };
}

index_error_from!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
    redb::CompactionError,
    bincode::Error,
);

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Config(e.to_string())
    }
}
