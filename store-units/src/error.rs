use std::{error, fmt, io, result};

/// Errors that can arise while parsing or writing the low-level container
/// format: a bad magic/version/type header, malformed input handed to the
/// writer, or a failed read/write/truncate on the backing file.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    FormatError {
        expected_type: u16,
        found_type: u16,
    },
    VersionMismatch {
        expected: u8,
        found: u8,
    },
    MissingMagic,
    /// zero key used, value too large for the configured block size, or a
    /// negative/zero load factor was requested.
    BadInput(String),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(_) => write!(f, "I/O error"),
            Error::FormatError {
                expected_type,
                found_type,
            } => write!(
                f,
                "wrong store type, expected `{}` but found `{}`",
                expected_type, found_type
            ),
            Error::VersionMismatch { expected, found } => write!(
                f,
                "unsupported store version, expected `{}` but found `{}`",
                expected, found
            ),
            Error::MissingMagic => write!(f, "missing or corrupt store file magic"),
            Error::BadInput(msg) => write!(f, "bad input: {}", msg),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(ref err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
