use std::{error, fmt};
use store_units::Error as UnitsError;

/// Errors surfaced above the block/container layer: engine construction,
/// the query pipeline, and handle misuse.
#[derive(Debug)]
pub enum Error {
    Units(UnitsError),
    /// Separator or cuckoo displacement exceeded its probe budget; caller
    /// must reduce the load factor or change parameters.
    ConstructionFailure(String),
    /// Reusing a non-idle `QueryHandle`, a misaligned direct-I/O buffer, or
    /// enqueuing after the view's engine was closed.
    UsageError(String),
}

impl From<UnitsError> for Error {
    fn from(e: UnitsError) -> Error {
        Error::Units(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::Units(UnitsError::from(e))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Units(e) => write!(f, "{}", e),
            Error::ConstructionFailure(msg) => write!(f, "construction failure: {}", msg),
            Error::UsageError(msg) => write!(f, "usage error: {}", msg),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Units(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
