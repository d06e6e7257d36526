//! The engine's error taxonomy.
//!
//! Every variant maps to exactly one negative errno at the bridge boundary.
//! Internal contract violations (bitmap position out of range, pool
//! exhaustion where the dispatcher didn't pre-check, mmap failure at
//! mount) are not represented here — they are fatal and surface as a
//! panic, per the spec's "errors are returned, never thrown... internal
//! contract violations are fatal assertions" rule.

use std::fmt;

/// An error raised by a dispatcher-level operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A path component does not resolve.
    NotFound,
    /// A creation target already exists.
    Exists,
    /// `rmdir` on a non-empty directory.
    NotEmpty,
    /// A directory's 64-entry table is full.
    NoSpace,
    /// A path component that must be a directory is not one.
    NotADirectory,
    /// A target that must not be a directory is one.
    IsADirectory,
    /// A name exceeds the 47-byte directory entry capacity.
    InvalidName,
}

impl Error {
    /// Returns the negative errno this error is surfaced as at the bridge.
    pub fn to_errno(self) -> i32 {
        match self {
            Error::NotFound => libc::ENOENT,
            Error::Exists => libc::EEXIST,
            Error::NotEmpty => libc::ENOTEMPTY,
            Error::NoSpace => libc::ENOSPC,
            Error::NotADirectory => libc::ENOTDIR,
            Error::IsADirectory => libc::EISDIR,
            Error::InvalidName => libc::ENAMETOOLONG,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NotFound => "no such file or directory",
            Error::Exists => "file exists",
            Error::NotEmpty => "directory not empty",
            Error::NoSpace => "no space left in directory",
            Error::NotADirectory => "not a directory",
            Error::IsADirectory => "is a directory",
            Error::InvalidName => "name too long",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
