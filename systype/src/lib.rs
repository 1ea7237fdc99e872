#![no_std]

//! Linux-compatible `errno` codes and the `Result` aliases used by every
//! other crate in this workspace.
//!
//! Defined in `<asm-generic/errno-base.h>` and `<asm-generic/errno.h>`:
//! <https://www.man7.org/linux/man-pages/man3/errno.3.html>

use strum::FromRepr;

pub type SysResult<T> = Result<T, SysError>;

/// Result of a syscall-shaped entry point: the non-negative count/handle on
/// success, or the negated errno a caller would see from the real syscall.
pub type SyscallResult = Result<usize, SysError>;

#[derive(FromRepr, Clone, Copy, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum SysError {
    /// Operation not permitted
    EPERM = 1,
    /// No such file or directory
    ENOENT = 2,
    /// No such process
    ESRCH = 3,
    /// Interrupted system call
    EINTR = 4,
    /// I/O error
    EIO = 5,
    /// No such device or address
    ENXIO = 6,
    /// Argument list too long
    E2BIG = 7,
    /// Bad file number
    EBADF = 9,
    /// Resource temporarily unavailable
    EAGAIN = 11,
    /// Out of memory
    ENOMEM = 12,
    /// Permission denied
    EACCES = 13,
    /// Bad address
    EFAULT = 14,
    /// Device or resource busy
    EBUSY = 16,
    /// File exists
    EEXIST = 17,
    /// No such device
    ENODEV = 19,
    /// Not a directory
    ENOTDIR = 20,
    /// Is a directory
    EISDIR = 21,
    /// Invalid argument
    EINVAL = 22,
    /// File table overflow
    ENFILE = 23,
    /// Too many open files
    EMFILE = 24,
    /// Not a typewriter
    ENOTTY = 25,
    /// File too large
    EFBIG = 27,
    /// No space left on device
    ENOSPC = 28,
    /// Illegal seek
    ESPIPE = 29,
    /// Read-only file system
    EROFS = 30,
    /// Too many links
    EMLINK = 31,
    /// Broken pipe
    EPIPE = 32,
    /// File name too long
    ENAMETOOLONG = 36,
    /// Invalid system call number
    ENOSYS = 38,
    /// Directory not empty
    ENOTEMPTY = 39,
    /// Too many symbolic links encountered
    ELOOP = 40,
    /// Value too large for defined data type
    EOVERFLOW = 75,
    /// Operation not supported
    EOPNOTSUPP = 95,
}

impl SysError {
    /// Returns the error description, matching `strerror(3)`.
    pub const fn as_str(&self) -> &'static str {
        use SysError::*;
        match self {
            EPERM => "Operation not permitted",
            ENOENT => "No such file or directory",
            ESRCH => "No such process",
            EINTR => "Interrupted system call",
            EIO => "I/O error",
            ENXIO => "No such device or address",
            E2BIG => "Argument list too long",
            EBADF => "Bad file number",
            EAGAIN => "Try again",
            ENOMEM => "Out of memory",
            EACCES => "Permission denied",
            EFAULT => "Bad address",
            EBUSY => "Device or resource busy",
            EEXIST => "File exists",
            ENODEV => "No such device",
            ENOTDIR => "Not a directory",
            EISDIR => "Is a directory",
            EINVAL => "Invalid argument",
            ENFILE => "File table overflow",
            EMFILE => "Too many open files",
            ENOTTY => "Not a typewriter",
            EFBIG => "File too large",
            ENOSPC => "No space left on device",
            ESPIPE => "Illegal seek",
            EROFS => "Read-only file system",
            EMLINK => "Too many links",
            EPIPE => "Broken pipe",
            ENAMETOOLONG => "File name too long",
            ENOSYS => "Invalid system call number",
            ENOTEMPTY => "Directory not empty",
            ELOOP => "Too many symbolic links encountered",
            EOVERFLOW => "Value too large for defined data type",
            EOPNOTSUPP => "Operation not supported",
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        Self::from_repr(value)
    }

    /// Returns the error code value as `i32`.
    pub const fn code(self) -> i32 {
        self as i32
    }
}

impl core::fmt::Display for SysError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
