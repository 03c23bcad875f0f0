//! Error taxonomy for the on-disk HDF5 infrastructure.
//!
//! Every error is fatal to the operation in progress; nothing in this crate
//! retries internally. Read errors carry the file offset they were detected
//! at when one is available, so a caller can point a hex dump at the right
//! spot.

use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// Bad signature, unsupported version, or an otherwise impossible field
    /// value (e.g. a declared entry count implying a negative payload size).
    Format { message: String, offset: Option<u64> },
    /// A child offset or length falls outside the bounds of the file, or a
    /// read ran out of bytes before a structure finished parsing.
    Bounds { message: String, offset: Option<u64> },
    /// Duplicate object id, a cycle in the group B-tree, or a null
    /// terminator whose declared size disagrees with the block.
    Integrity { message: String, offset: Option<u64> },
    /// A write-side precondition was violated (`addDataset` on a non-leaf
    /// tree, a global-heap object id overflowing 16 bits, an empty name).
    Invariant { message: String },
    Io(std::io::Error),
}

impl Error {
    pub fn format(message: impl Into<String>, offset: Option<u64>) -> Self {
        Error::Format { message: message.into(), offset }
    }

    pub fn bounds(message: impl Into<String>, offset: Option<u64>) -> Self {
        Error::Bounds { message: message.into(), offset }
    }

    pub fn integrity(message: impl Into<String>, offset: Option<u64>) -> Self {
        Error::Integrity { message: message.into(), offset }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Error::Invariant { message: message.into() }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Format { message, offset } => write_with_offset(f, "format error", message, *offset),
            Error::Bounds { message, offset } => write_with_offset(f, "bounds error", message, *offset),
            Error::Integrity { message, offset } => write_with_offset(f, "integrity error", message, *offset),
            Error::Invariant { message } => write!(f, "invariant violated: {}", message),
            Error::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

fn write_with_offset(
    f: &mut fmt::Formatter,
    kind: &str,
    message: &str,
    offset: Option<u64>,
) -> fmt::Result {
    match offset {
        Some(o) => write!(f, "{}: {} (at file offset {})", kind, message, o),
        None => write!(f, "{}: {}", kind, message),
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<nom::Err<nom::error::VerboseError<&[u8]>>> for Error {
    fn from(e: nom::Err<nom::error::VerboseError<&[u8]>>) -> Self {
        match e {
            nom::Err::Incomplete(_) => Error::Bounds {
                message: "input ended before the structure was fully parsed".to_string(),
                offset: None,
            },
            nom::Err::Error(e) | nom::Err::Failure(e) => Error::Format {
                message: format!("{:?}", e.errors),
                offset: None,
            },
        }
    }
}
