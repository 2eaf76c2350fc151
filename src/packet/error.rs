use std::{fmt, io};

/// Errors produced while decoding or encoding mDNS messages, or while parsing names.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum Error {
    /// The message ended in the middle of a field.
    Eof,
    /// A name compression pointer did not point strictly backwards.
    PointerLoop,
    /// A field held a value that is reserved or not understood.
    InvalidValue,
    /// The message has too many records, or a record is too large, to be encoded.
    Truncated,
    /// A name contained an empty label.
    InvalidEmptyLabel,
    /// A label was longer than 63 bytes.
    LabelTooLong,
}

impl Error {
    fn io_kind(self) -> io::ErrorKind {
        match self {
            Error::Eof => io::ErrorKind::UnexpectedEof,
            Error::PointerLoop | Error::InvalidValue => io::ErrorKind::InvalidData,
            Error::Truncated | Error::InvalidEmptyLabel | Error::LabelTooLong => {
                io::ErrorKind::InvalidInput
            }
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Error::Eof => "message ended unexpectedly",
            Error::PointerLoop => "name compression pointer loop (possibly a malicious message)",
            Error::InvalidValue => "invalid or unsupported value",
            Error::Truncated => "message too large to encode",
            Error::InvalidEmptyLabel => "empty label in domain name",
            Error::LabelTooLong => "domain name label longer than 63 bytes",
        })
    }
}

impl std::error::Error for Error {}

impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        io::Error::new(e.io_kind(), e)
    }
}
