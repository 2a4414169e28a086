//! Error kinds surfaced by every fallible VFS operation.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type FsResult<T> = Result<T, FsError>;

/// Error kinds reported by the VFS and by file-system drivers.
///
/// Each variant corresponds to one classic errno; [`From<FsError> for i32`]
/// gives the numeric value for embedders that speak errno.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    NotDirectory,
    #[error("is a directory")]
    IsDirectory,
    #[error("operation not supported")]
    NotSupported,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("bad file descriptor")]
    BadDescriptor,
    #[error("file exists")]
    Exists,
    #[error("device or resource busy")]
    Busy,
    #[error("cross-device link")]
    CrossDevice,
    #[error("directory not empty")]
    NotEmpty,
    #[error("file name too long")]
    NameTooLong,
    #[error("read-only file system")]
    ReadOnly,
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("too many levels of symbolic links")]
    TooManyLinks,
    #[error("result out of range")]
    OutOfRange,
}

impl From<FsError> for i32 {
    fn from(e: FsError) -> Self {
        match e {
            FsError::OutOfMemory => 12,      // ENOMEM
            FsError::NotFound => 2,          // ENOENT
            FsError::NotDirectory => 20,     // ENOTDIR
            FsError::IsDirectory => 21,      // EISDIR
            FsError::NotSupported => 95,     // ENOTSUP
            FsError::InvalidArgument => 22,  // EINVAL
            FsError::BadDescriptor => 9,     // EBADF
            FsError::Exists => 17,           // EEXIST
            FsError::Busy => 16,             // EBUSY
            FsError::CrossDevice => 18,      // EXDEV
            FsError::NotEmpty => 39,         // ENOTEMPTY
            FsError::NameTooLong => 36,      // ENAMETOOLONG
            FsError::ReadOnly => 30,         // EROFS
            FsError::TooManyOpenFiles => 24, // EMFILE
            FsError::TooManyLinks => 40,     // ELOOP
            FsError::OutOfRange => 34,       // ERANGE
        }
    }
}
