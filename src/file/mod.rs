/*
 * This file is part of Nucleus.
 *
 * Nucleus is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Nucleus is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Nucleus. If not, see <https://www.gnu.org/licenses/>.
 */

//! Virtual filesystem: a mount table dispatching path operations to pluggable filesystem
//! backends, plus the two backends this core ships, [`memfs`] and [`fs::ext2`].

pub mod cpio;
pub mod fs;
pub mod memfs;
pub mod page_cache;
pub mod vfs;

use utils::{
	collections::string::String,
	errno::{EResult, Errno},
	ptr::arc::Arc,
};

/// The type of a file, as reported by [`FileSystem::stat`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
	Regular,
	Directory,
}

/// Attributes returned by `stat`.
#[derive(Clone, Copy, Debug)]
pub struct FileAttribute {
	pub inode: u64,
	pub size: u64,
	pub file_type: FileType,
}

/// One entry returned by [`FileDescriptor::iterate`].
#[derive(Clone, Debug)]
pub struct DirEntry {
	pub inode: u64,
	pub file_type: FileType,
	pub name: String,
}

/// A capability to read, write and enumerate one open file.
pub trait FileDescriptor: Send + Sync {
	/// Reads up to `buf.len()` bytes starting at the descriptor's current position, returning the
	/// number of bytes read (`0` at end of file).
	fn read(&self, buf: &mut [u8]) -> EResult<usize>;

	/// Writes `buf` at the descriptor's current position, returning the number of bytes written.
	fn write(&self, buf: &[u8]) -> EResult<usize>;

	/// Sets the descriptor's position to `offset` from the start of the file (`SEEK_SET`
	/// semantics), returning the new position.
	fn seek(&self, offset: u64) -> EResult<u64>;

	/// Returns this descriptor's attributes.
	fn stat(&self) -> EResult<FileAttribute>;

	/// Reads the next directory entry starting at byte `pos` into a fresh [`DirEntry`], returning
	/// the entry and the position to resume at, or `None` at the end of the directory.
	///
	/// The default implementation rejects iteration on non-directories.
	fn iterate(&self, _pos: u64) -> EResult<Option<(DirEntry, u64)>> {
		Err(Errno::ENOTDIR)
	}

	/// Maps this descriptor's content at `offset` into the caller's address space. Backends that
	/// do not support `mmap` return `ENOSYS`.
	fn mmap(&self, _offset: u64, _len: usize) -> EResult<crate::memory::PhysAddr> {
		Err(Errno::ENOSYS)
	}
}

/// A pluggable filesystem backend, bound to a mount point in the [`vfs`] mount table.
pub trait FileSystem: Send + Sync {
	/// A human-readable name, for diagnostics.
	fn name(&self) -> &str;

	/// Opens `path` (relative to this filesystem's root) and returns a descriptor for it.
	fn open(&self, path: &str) -> EResult<Arc<dyn FileDescriptor>>;

	/// Returns the attributes of the file at `path`.
	fn stat(&self, path: &str) -> EResult<FileAttribute>;

	/// Creates a directory at `path`.
	fn mkdir(&self, path: &str) -> EResult<()>;

	/// Removes the file at `path`.
	fn unlink(&self, path: &str) -> EResult<()>;

	/// Removes the empty directory at `path`.
	fn rmdir(&self, path: &str) -> EResult<()>;
}
