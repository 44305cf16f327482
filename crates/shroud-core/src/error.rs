use std::path::Path;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the whole workspace.
///
/// `Auth` and `Corruption` mean the file must be regarded as tampered with or
/// mis-keyed; they are never recovered internally. `Validation` is always a
/// caller mistake and is raised before any state is touched.
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation error: {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("io error: {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{op} failed: {message}")]
    Encryption {
        op: &'static str,
        message: String,
    },

    #[error("corruption detected: {context}")]
    Corruption { context: String },

    #[error("authentication failed: data may be corrupted or the key is wrong")]
    Auth,

    #[error("invalid file header")]
    InvalidHeader,

    #[error("unsupported file format version {0}")]
    UnsupportedVersion(u8),

    #[error("unsupported cipher suite (code {0})")]
    UnsupportedCipher(u8),

    #[error("offset {offset} out of range for file of {size} bytes")]
    InvalidOffset { offset: i64, size: u64 },

    #[error("no catalog entry for token {0:?}")]
    UnknownToken(String),

    #[error("file handle is closed")]
    Closed,
}

impl Error {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Error::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Error::Io {
            op,
            path: path.display().to_string(),
            source,
        }
    }

    pub fn encryption(op: &'static str, message: impl Into<String>) -> Self {
        Error::Encryption {
            op,
            message: message.into(),
        }
    }

    pub fn corruption(context: impl Into<String>) -> Self {
        Error::Corruption {
            context: context.into(),
        }
    }

    /// True for the failure classes that mark a file as tampered or mis-keyed.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Error::Auth
                | Error::Corruption { .. }
                | Error::InvalidHeader
                | Error::UnsupportedVersion(_)
                | Error::UnsupportedCipher(_)
        )
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;
        let kind = match &err {
            Error::Io { source, .. } => source.kind(),
            Error::Validation { .. } => ErrorKind::InvalidInput,
            Error::InvalidOffset { .. } => ErrorKind::InvalidInput,
            Error::UnknownToken(_) => ErrorKind::NotFound,
            Error::Closed => ErrorKind::BrokenPipe,
            _ => ErrorKind::InvalidData,
        };
        std::io::Error::new(kind, err)
    }
}
