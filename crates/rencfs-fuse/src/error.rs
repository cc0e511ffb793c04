//! Error mapping for the FUSE filesystem.
//!
//! Converts the engine's error taxonomy into the POSIX error codes FUSE
//! returns to the kernel. Nothing is recovered here; every engine error has
//! exactly one errno.

use std::io;

use rencfs_core::ViewError;

/// Extension trait to convert errors to errno.
pub trait ToErrno {
    /// Converts this error to a libc error code.
    fn to_errno(&self) -> i32;
}

impl ToErrno for ViewError {
    fn to_errno(&self) -> i32 {
        match self {
            ViewError::NotFound { .. } => libc::ENOENT,
            ViewError::PermissionDenied { .. } => libc::EACCES,
            ViewError::ReadOnly => libc::EROFS,
            ViewError::AuthenticationFailed => libc::EPERM,
            ViewError::BadHandle(_) => libc::EBADF,
            ViewError::NotSupported => libc::ENOTSUP,
            ViewError::TruncatedCiphertext { .. } => libc::EIO,
            ViewError::Io(e) => io_error_to_errno(e),
        }
    }
}

impl ToErrno for io::Error {
    fn to_errno(&self) -> i32 {
        io_error_to_errno(self)
    }
}

/// Converts an IO error to a libc error code, falling back to EIO when the
/// error carries no OS errno.
pub fn io_error_to_errno(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(libc::EIO)
}
