/// Represents errors that can occur in the compound file system
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Address or length outside the device (or view) bounds
    OutOfRange,

    /// The backing device cannot fit another sector
    OutOfSpace,

    /// Header signature, version or byte-order marker is wrong
    BadFormat(&'static str),

    /// A sector or entry chain landed on a reserved value mid-walk
    FileCorrupt,

    /// Sector shift outside the accepted range (got)
    SectorTooHuge(u16),

    /// An entry with the same name already exists in the directory
    AlreadyExists,

    /// Path does not resolve to an entry
    NotFound,

    /// A path component other than the last is not a storage entry
    NotADirectory,

    /// A stream operation was attempted on a storage entry
    IsADirectory,

    /// Handle is stale or was never issued
    InvalidHandle,

    /// Operation conflicts with the open mode or entry state
    PermissionDenied,

    /// Invalid argument (reason)
    InvalidArgument(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CompoundFsError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Crate result
pub type Result<T> = std::result::Result<T, Error>;

/// Error code surfaced by [`FileSystem::last_error`](crate::FileSystem::last_error)
///
/// Façade calls that fail store the code of the error they swallowed,
/// so callers using the bool/option surface can still ask what happened.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ErrorCode {
    /// No error recorded
    #[default]
    NoError,

    /// Path did not resolve
    NotFound,

    /// Name collision in the target directory
    AlreadyExists,

    /// Path component is not a directory
    NotADirectory,

    /// Stream operation on a directory
    IsADirectory,

    /// Stale or unknown handle
    InvalidHandle,

    /// Open mode or entry state forbids the operation
    PermissionDenied,

    /// Device cannot fit another sector
    OutOfSpace,

    /// Access outside device bounds
    OutOfRange,

    /// Chain walk hit a reserved value
    FileCorrupt,

    /// Header failed validation
    BadFormat,

    /// Sector shift out of range
    SectorTooHuge,

    /// I/O error from the backing device
    Io,
}

impl From<&Error> for ErrorCode {
    fn from(value: &Error) -> Self {
        match value {
            Error::Io(_) => Self::Io,
            Error::OutOfRange => Self::OutOfRange,
            Error::OutOfSpace => Self::OutOfSpace,
            Error::BadFormat(_) => Self::BadFormat,
            Error::FileCorrupt => Self::FileCorrupt,
            Error::SectorTooHuge(_) => Self::SectorTooHuge,
            Error::AlreadyExists => Self::AlreadyExists,
            Error::NotFound => Self::NotFound,
            Error::NotADirectory => Self::NotADirectory,
            Error::IsADirectory => Self::IsADirectory,
            Error::InvalidHandle => Self::InvalidHandle,
            Error::PermissionDenied | Error::InvalidArgument(_) => Self::PermissionDenied,
        }
    }
}
