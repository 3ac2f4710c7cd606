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

//! Mount table and path resolution.
//!
//! Path resolution is a single linear scan for the longest mounted prefix; there is no inode
//! cache and no notion of cross-mount symlinks. This matches a kernel that mounts at most a
//! handful of filesystems (the in-memory root and one ext2 disk).

use super::{FileAttribute, FileDescriptor, FileSystem, FileType};
use utils::{
	collections::string::String,
	errno::{EResult, Errno},
	lock::IntMutex,
	ptr::arc::Arc,
};

/// Maximum number of simultaneous mounts.
pub const MAX_MOUNTS: usize = 16;

struct Mount {
	prefix: String,
	fs: Arc<dyn FileSystem>,
}

struct MountTable {
	mounts: [Option<Mount>; MAX_MOUNTS],
}

impl MountTable {
	const fn new() -> Self {
		Self {
			mounts: [const { None }; MAX_MOUNTS],
		}
	}
}

static MOUNTS: IntMutex<MountTable> = IntMutex::new(MountTable::new());

/// Mounts `fs` at `prefix`. Fails with `ENOSPC`-like semantics (mapped to `ENOMEM` here, as this
/// core has no separate "mount table full" errno) once [`MAX_MOUNTS`] entries are in use.
pub fn register_fs(prefix: &str, fs: Arc<dyn FileSystem>) -> EResult<()> {
	let mut table = MOUNTS.lock();
	let slot = table.mounts.iter_mut().find(|m| m.is_none()).ok_or(Errno::ENOMEM)?;
	*slot = Some(Mount {
		prefix: String::try_from(prefix).map_err(|_| Errno::ENOMEM)?,
		fs,
	});
	Ok(())
}

/// Finds the mount whose prefix is the longest match for `path`, returning the filesystem and the
/// remainder of the path past the prefix.
fn resolve(path: &str) -> EResult<(Arc<dyn FileSystem>, String)> {
	let table = MOUNTS.lock();
	let mut best: Option<(&str, &Arc<dyn FileSystem>)> = None;
	for mount in table.mounts.iter().flatten() {
		if path.starts_with(mount.prefix.as_str()) {
			let better = best.is_none_or(|(p, _)| mount.prefix.len() > p.len());
			if better {
				best = Some((mount.prefix.as_str(), &mount.fs));
			}
		}
	}
	let (prefix, fs) = best.ok_or(Errno::ENOENT)?;
	let rest = path[prefix.len()..].trim_start_matches('/');
	let rest = String::try_from(rest).map_err(|_| Errno::ENOMEM)?;
	Ok((fs.clone(), rest))
}

/// Opens `path`, dispatching to the filesystem with the longest matching mount prefix.
pub fn open(path: &str) -> EResult<Arc<dyn FileDescriptor>> {
	let (fs, rest) = resolve(path)?;
	fs.open(rest.as_str())
}

/// Returns the attributes of the file at `path`.
pub fn stat(path: &str) -> EResult<FileAttribute> {
	let (fs, rest) = resolve(path)?;
	fs.stat(rest.as_str())
}

/// Creates a directory at `path`.
pub fn mkdir(path: &str) -> EResult<()> {
	let (fs, rest) = resolve(path)?;
	fs.mkdir(rest.as_str())
}

/// Removes the file at `path`.
pub fn unlink(path: &str) -> EResult<()> {
	let (fs, rest) = resolve(path)?;
	fs.unlink(rest.as_str())
}

/// Removes the empty directory at `path`.
pub fn rmdir(path: &str) -> EResult<()> {
	let (fs, rest) = resolve(path)?;
	fs.rmdir(rest.as_str())
}

/// Resolves `path`, requires it to name a directory, and copies it into `cwd`.
pub fn chdir(cwd: &mut String, path: &str) -> EResult<()> {
	let attr = stat(path)?;
	if attr.file_type != FileType::Directory {
		return Err(Errno::ENOTDIR);
	}
	*cwd = String::try_from(path).map_err(|_| Errno::ENOMEM)?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Empty;

	impl FileSystem for Empty {
		fn name(&self) -> &str {
			"empty"
		}

		fn open(&self, _path: &str) -> EResult<Arc<dyn FileDescriptor>> {
			Err(Errno::ENOENT)
		}

		fn stat(&self, _path: &str) -> EResult<FileAttribute> {
			Err(Errno::ENOENT)
		}

		fn mkdir(&self, _path: &str) -> EResult<()> {
			Err(Errno::ENOSYS)
		}

		fn unlink(&self, _path: &str) -> EResult<()> {
			Err(Errno::ENOSYS)
		}

		fn rmdir(&self, _path: &str) -> EResult<()> {
			Err(Errno::ENOSYS)
		}
	}

	#[test]
	fn longest_prefix_wins() {
		register_fs("/", Arc::new(Empty)).unwrap();
		register_fs("/mnt", Arc::new(Empty)).unwrap();
		let (_, rest) = resolve("/mnt/hello.txt").unwrap();
		assert_eq!(rest.as_str(), "hello.txt");
	}
}
