use std::fmt::{self, Debug, Display, Formatter};

use crate::config::ConfigError;

/// Unified error type for the transfer daemon. Every fallible path in the
/// crate funnels into one of these variants so callers can match on cause
/// without downcasting `Box<dyn Error>`.
pub enum Error {
    MalformedFrame(String),
    OversizedBody { len: u64, max: u64 },
    UnauthorizedPath(String),
    FilesystemError(std::io::Error),
    NetworkError(std::io::Error),
    QueueClosed,
    ArchiveOpen(String),
    ArchiveRead(String),
    ArchivePassword,
    ArchiveExtract(String),
    OutOfMemory,
    Aborted,
    Config(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::MalformedFrame(msg) => write!(f, "malformed frame: {msg}"),
            Error::OversizedBody { len, max } => {
                write!(f, "body of {len} bytes exceeds the {max} byte limit")
            }
            Error::UnauthorizedPath(path) => write!(f, "path rejected by sanitizer: {path}"),
            Error::FilesystemError(e) => write!(f, "filesystem error: {e}"),
            Error::NetworkError(e) => write!(f, "network error: {e}"),
            Error::QueueClosed => write!(f, "pack queue closed"),
            Error::ArchiveOpen(msg) => write!(f, "failed to open archive: {msg}"),
            Error::ArchiveRead(msg) => write!(f, "failed to read archive: {msg}"),
            Error::ArchivePassword => write!(f, "archive requires a password"),
            Error::ArchiveExtract(msg) => write!(f, "extraction failed: {msg}"),
            Error::OutOfMemory => write!(f, "out of memory"),
            Error::Aborted => write!(f, "operation aborted"),
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "\x1b[31mERROR\x1b[0m: {self}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::FilesystemError(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e.message)
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Config(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Config(s.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
