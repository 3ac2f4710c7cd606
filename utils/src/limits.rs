//! System-wide constants.

/// The size in bytes of a memory page.
pub const PAGE_SIZE: usize = 4096;
/// The maximum length of a file name, not including the terminating null byte.
pub const NAME_MAX: usize = 255;
/// The maximum length of a path, including the terminating null byte.
pub const PATH_MAX: usize = 4096;
