use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// `[offset, offset+size)` does not fit in the buffer.
    OutOfBounds,
    /// A string table lookup past the declared table size.
    UnexpectedEnd,
    /// A string table lookup inside the size field.
    InvalidOffset,
    Malformed,
    /// An RVA not covered by any section.
    Unmapped,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct VpeObjectError {
    kind: ErrorKind,
    message: String,
}

impl VpeObjectError {
    pub fn new(kind: ErrorKind, message: String) -> Self {
        Self {
            kind,
            message,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
