//! Kernel-wide error codes.
//!
//! The kernel never unwinds: every fallible operation returns a `Result` whose error is either a
//! plain allocation failure ([`AllocError`]) or a small negative integer compatible with the
//! syscall ABI ([`Errno`]).

use core::fmt;

/// An allocation failed: the frame allocator, the slab allocator or the heap had no memory left
/// to satisfy the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError;

impl fmt::Display for AllocError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "out of memory")
	}
}

/// Result of a fallible allocation.
pub type AllocResult<T> = Result<T, AllocError>;

/// A small negative error code returned by a syscall handler.
///
/// Variants are listed in roughly the order the core uses them; the numeric value returned to
/// userspace is `-(variant as i32)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
	/// Operation not permitted / no such syscall.
	EPERM = 1,
	/// No such file or directory.
	ENOENT = 2,
	/// No such process.
	ESRCH = 3,
	/// Interrupted call.
	EINTR = 4,
	/// I/O error.
	EIO = 5,
	/// Bad file descriptor.
	EBADF = 9,
	/// Out of memory.
	ENOMEM = 12,
	/// Bad address.
	EFAULT = 14,
	/// File exists.
	EEXIST = 17,
	/// Not a directory.
	ENOTDIR = 20,
	/// Is a directory.
	EISDIR = 21,
	/// Invalid argument.
	EINVAL = 22,
	/// Too many open files.
	EMFILE = 24,
	/// File name too long.
	ENAMETOOLONG = 36,
	/// Function not implemented.
	ENOSYS = 38,
	/// Directory not empty.
	ENOTEMPTY = 39,
	/// File too large.
	EFBIG = 27,
	/// No space left on device.
	ENOSPC = 28,
	/// Resource deadlock would occur.
	EDEADLK = 35,
}

impl Errno {
	/// Returns the ABI-visible integer encoding this error (always negative).
	#[inline]
	pub const fn as_int(self) -> i32 {
		-(self as i32)
	}
}

impl From<AllocError> for Errno {
	fn from(_: AllocError) -> Self {
		Errno::ENOMEM
	}
}

impl fmt::Display for Errno {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{self:?}")
	}
}

/// Result of a fallible kernel operation whose error is reported to userspace.
pub type EResult<T> = Result<T, Errno>;
