// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Corruption: {0}")]
    Corruption(String),
    #[error("Not supported: {0}")]
    NotSupported(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("{0}({1}) not found")]
    NotFound(&'static str, String),
    #[error("{0}")]
    EndOfFile(String),
    #[error("IO error: {0}")]
    Io(#[from] Box<std::io::Error>),
    #[error("Prost decode error: {0}")]
    ProstDecode(prost::DecodeError),
    #[error("{0}")]
    Nested(#[from] Arc<TracedStorageError>),
}

impl From<std::io::Error> for TracedStorageError {
    #[inline]
    fn from(e: std::io::Error) -> TracedStorageError {
        StorageError::Io(e.into()).into()
    }
}

impl From<prost::DecodeError> for TracedStorageError {
    #[inline]
    fn from(e: prost::DecodeError) -> TracedStorageError {
        StorageError::ProstDecode(e).into()
    }
}

impl From<Arc<TracedStorageError>> for TracedStorageError {
    #[inline]
    fn from(e: Arc<TracedStorageError>) -> TracedStorageError {
        StorageError::Nested(e).into()
    }
}

/// [`StorageError`] with backtrace.
pub struct TracedStorageError {
    source: StorageError,
    backtrace: Backtrace,
}

impl From<StorageError> for TracedStorageError {
    #[inline]
    fn from(source: StorageError) -> Self {
        Self {
            source,
            backtrace: Backtrace::capture(),
        }
    }
}

impl fmt::Display for TracedStorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)?;
        if self.backtrace.status() == BacktraceStatus::Captured {
            write!(f, "\n{}", self.backtrace)?;
        }
        Ok(())
    }
}

impl fmt::Debug for TracedStorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl std::error::Error for TracedStorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl TracedStorageError {
    pub fn corruption(message: impl ToString) -> Self {
        StorageError::Corruption(message.to_string()).into()
    }

    pub fn not_supported(message: impl ToString) -> Self {
        StorageError::NotSupported(message.to_string()).into()
    }

    pub fn invalid_argument(message: impl ToString) -> Self {
        StorageError::InvalidArgument(message.to_string()).into()
    }

    pub fn internal(message: impl ToString) -> Self {
        StorageError::InternalError(message.to_string()).into()
    }

    pub fn not_found(ty: &'static str, item: impl ToString) -> Self {
        StorageError::NotFound(ty, item.to_string()).into()
    }

    pub fn end_of_file(message: impl ToString) -> Self {
        StorageError::EndOfFile(message.to_string()).into()
    }

    /// The underlying error, looking through errors replayed from a shared failure.
    pub fn kind(&self) -> &StorageError {
        match &self.source {
            StorageError::Nested(inner) => inner.kind(),
            source => source,
        }
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self.kind(), StorageError::Corruption(_))
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(self.kind(), StorageError::NotSupported(_))
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self.kind(), StorageError::InvalidArgument(_))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.kind(), StorageError::InternalError(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind(), StorageError::NotFound(..))
    }

    /// Whether the error only signals that there is nothing to read.
    pub fn is_end_of_file(&self) -> bool {
        matches!(self.kind(), StorageError::EndOfFile(_))
    }
}

pub type StorageResult<T> = std::result::Result<T, TracedStorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_error_keeps_kind() {
        let first = Arc::new(TracedStorageError::corruption("bad page"));
        let replayed: TracedStorageError = first.clone().into();
        assert!(replayed.is_corruption());
        assert!(replayed.to_string().starts_with("Corruption: bad page"));
        assert!(!replayed.is_end_of_file());
    }

    #[test]
    fn io_error_converts() {
        let err: TracedStorageError =
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read").into();
        assert!(matches!(err.kind(), StorageError::Io(_)));
    }
}
