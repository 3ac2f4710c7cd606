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

//! In-memory filesystem used as the root filesystem, populated from the initramfs.
//!
//! Nodes live in a flat arena indexed by `usize` rather than through parent/child/sibling
//! pointers, so the tree (which is genuinely cyclic: children point back to their parent) does
//! not need unsafe or reference counting to express.

use super::{DirEntry, FileAttribute, FileDescriptor, FileSystem, FileType, cpio};
use alloc::vec::Vec;
use utils::{
	collections::string::String,
	errno::{EResult, Errno},
	ptr::arc::Arc,
};

const MODE_DIR: u32 = 0x4000;
const MODE_REG: u32 = 0x8000;

struct Node {
	name: String,
	kind: FileType,
	mode: u32,
	data: Vec<u8>,
	parent: Option<usize>,
	first_child: Option<usize>,
	next_sibling: Option<usize>,
}

struct Inner {
	nodes: Vec<Node>,
}

impl Inner {
	fn child_named(&self, dir: usize, name: &str) -> Option<usize> {
		let mut cur = self.nodes[dir].first_child;
		while let Some(i) = cur {
			if self.nodes[i].name.as_str() == name {
				return Some(i);
			}
			cur = self.nodes[i].next_sibling;
		}
		None
	}

	fn insert_child(&mut self, parent: usize, node: Node) -> usize {
		let index = self.nodes.len();
		let mut node = node;
		node.parent = Some(parent);
		node.next_sibling = self.nodes[parent].first_child;
		self.nodes.push(node);
		self.nodes[parent].first_child = Some(index);
		index
	}

	fn resolve(&self, path: &str) -> EResult<usize> {
		let mut cur = 0usize;
		for component in path.split('/').filter(|c| !c.is_empty()) {
			if self.nodes[cur].kind != FileType::Directory {
				return Err(Errno::ENOTDIR);
			}
			cur = self.child_named(cur, component).ok_or(Errno::ENOENT)?;
		}
		Ok(cur)
	}
}

/// Shared state backing a [`MemFs`] handle; kept in its own `Arc` so descriptors can hold a clone
/// without reconstructing one from `&self`.
struct Shared(utils::lock::IntMutex<Inner>);

/// The in-memory filesystem. Cheaply `Clone`-able; every clone refers to the same tree.
#[derive(Clone)]
pub struct MemFs(Arc<Shared>);

impl MemFs {
	/// Creates a filesystem containing just an empty root directory.
	pub fn new() -> Self {
		Self(Arc::new(Shared(utils::lock::IntMutex::new(Inner {
			nodes: alloc::vec![Node {
				name: String::new(),
				kind: FileType::Directory,
				mode: MODE_DIR | 0o755,
				data: Vec::new(),
				parent: None,
				first_child: None,
				next_sibling: None,
			}],
		}))))
	}

	fn inner(&self) -> &utils::lock::IntMutex<Inner> {
		&self.0.0
	}

	/// Ingests a CPIO "new ASCII" initramfs image, inserting every entry directly under the root
	/// regardless of slashes embedded in its recorded name: the loader does not rebuild a path
	/// hierarchy from CPIO names.
	pub fn load_initramfs(&self, image: &[u8]) -> EResult<()> {
		let mut inner = self.inner().lock();
		cpio::for_each(image, |entry| {
			let name = match String::try_from(entry.name) {
				Ok(n) => n,
				Err(_) => return,
			};
			if entry.mode & 0xf000 == MODE_DIR {
				inner.insert_child(
					0,
					Node {
						name,
						kind: FileType::Directory,
						mode: entry.mode,
						data: Vec::new(),
						parent: None,
						first_child: None,
						next_sibling: None,
					},
				);
			} else if entry.mode & 0xf000 == MODE_REG {
				let mut data = Vec::new();
				data.extend_from_slice(entry.data);
				inner.insert_child(
					0,
					Node {
						name,
						kind: FileType::Regular,
						mode: entry.mode,
						data,
						parent: None,
						first_child: None,
						next_sibling: None,
					},
				);
			}
		})
	}
}

struct MemFd {
	fs: MemFs,
	node: usize,
	pos: utils::lock::IntMutex<u64>,
}

impl FileDescriptor for MemFd {
	fn read(&self, buf: &mut [u8]) -> EResult<usize> {
		let inner = self.fs.inner().lock();
		let node = &inner.nodes[self.node];
		if node.kind != FileType::Regular {
			return Err(Errno::EISDIR);
		}
		let mut pos = self.pos.lock();
		let start = (*pos as usize).min(node.data.len());
		let end = (start + buf.len()).min(node.data.len());
		let n = end - start;
		buf[..n].copy_from_slice(&node.data[start..end]);
		*pos += n as u64;
		Ok(n)
	}

	fn write(&self, buf: &[u8]) -> EResult<usize> {
		let mut inner = self.fs.inner().lock();
		let mut pos = self.pos.lock();
		let start = *pos as usize;
		let node = &mut inner.nodes[self.node];
		if node.kind != FileType::Regular {
			return Err(Errno::EISDIR);
		}
		if start + buf.len() > node.data.len() {
			node.data.resize(start + buf.len(), 0);
		}
		node.data[start..start + buf.len()].copy_from_slice(buf);
		*pos += buf.len() as u64;
		Ok(buf.len())
	}

	fn seek(&self, offset: u64) -> EResult<u64> {
		*self.pos.lock() = offset;
		Ok(offset)
	}

	fn stat(&self) -> EResult<FileAttribute> {
		let inner = self.fs.inner().lock();
		let node = &inner.nodes[self.node];
		Ok(FileAttribute {
			inode: self.node as u64,
			size: node.data.len() as u64,
			file_type: node.kind,
		})
	}

	fn iterate(&self, pos: u64) -> EResult<Option<(DirEntry, u64)>> {
		let inner = self.fs.inner().lock();
		if inner.nodes[self.node].kind != FileType::Directory {
			return Err(Errno::ENOTDIR);
		}
		let mut cur = inner.nodes[self.node].first_child;
		let mut skip = pos;
		while let Some(i) = cur {
			if skip == 0 {
				let entry = DirEntry {
					inode: i as u64,
					file_type: inner.nodes[i].kind,
					name: inner.nodes[i].name.clone(),
				};
				return Ok(Some((entry, pos + 1)));
			}
			skip -= 1;
			cur = inner.nodes[i].next_sibling;
		}
		Ok(None)
	}
}

impl FileSystem for MemFs {
	fn name(&self) -> &str {
		"memfs"
	}

	fn open(&self, path: &str) -> EResult<Arc<dyn FileDescriptor>> {
		let node = self.inner().lock().resolve(path)?;
		Ok(Arc::new(MemFd {
			fs: self.clone(),
			node,
			pos: utils::lock::IntMutex::new(0),
		}))
	}

	fn stat(&self, path: &str) -> EResult<FileAttribute> {
		let inner = self.inner().lock();
		let node = inner.resolve(path)?;
		let node = &inner.nodes[node];
		Ok(FileAttribute {
			inode: 0,
			size: node.data.len() as u64,
			file_type: node.kind,
		})
	}

	fn mkdir(&self, path: &str) -> EResult<()> {
		let (parent_path, name) = path.rsplit_once('/').unwrap_or(("", path));
		let mut inner = self.inner().lock();
		let parent = inner.resolve(parent_path)?;
		if inner.child_named(parent, name).is_some() {
			return Err(Errno::EEXIST);
		}
		inner.insert_child(
			parent,
			Node {
				name: String::try_from(name).map_err(|_| Errno::ENOMEM)?,
				kind: FileType::Directory,
				mode: MODE_DIR | 0o755,
				data: Vec::new(),
				parent: None,
				first_child: None,
				next_sibling: None,
			},
		);
		Ok(())
	}

	fn unlink(&self, path: &str) -> EResult<()> {
		let mut inner = self.inner().lock();
		let node = inner.resolve(path)?;
		if inner.nodes[node].kind == FileType::Directory {
			return Err(Errno::EISDIR);
		}
		detach(&mut inner, node);
		Ok(())
	}

	fn rmdir(&self, path: &str) -> EResult<()> {
		let mut inner = self.inner().lock();
		let node = inner.resolve(path)?;
		if inner.nodes[node].kind != FileType::Directory {
			return Err(Errno::ENOTDIR);
		}
		if inner.nodes[node].first_child.is_some() {
			return Err(Errno::ENOTEMPTY);
		}
		detach(&mut inner, node);
		Ok(())
	}
}

fn detach(inner: &mut Inner, node: usize) {
	let Some(parent) = inner.nodes[node].parent else {
		return;
	};
	let mut cur = inner.nodes[parent].first_child;
	if cur == Some(node) {
		inner.nodes[parent].first_child = inner.nodes[node].next_sibling;
		return;
	}
	while let Some(i) = cur {
		if inner.nodes[i].next_sibling == Some(node) {
			inner.nodes[i].next_sibling = inner.nodes[node].next_sibling;
			return;
		}
		cur = inner.nodes[i].next_sibling;
	}
}


#[cfg(test)]
mod tests {
	use super::*;

	fn cpio_header(mode: u32, filesize: u32, namesize: u32) -> [u8; 110] {
		let mut h = [b'0'; 110];
		h[0..6].copy_from_slice(b"070701");
		let write_field = |h: &mut [u8; 110], offset: usize, value: u32| {
			let s = alloc::format!("{value:08x}");
			h[offset..offset + 8].copy_from_slice(s.as_bytes());
		};
		write_field(&mut h, 14, mode);
		write_field(&mut h, 54, filesize);
		write_field(&mut h, 94, namesize);
		h
	}

	fn push_entry(buf: &mut Vec<u8>, mode: u32, name: &str, data: &[u8]) {
		while buf.len() % 4 != 0 {
			buf.push(0);
		}
		let namesize = name.len() as u32 + 1;
		buf.extend_from_slice(&cpio_header(mode, data.len() as u32, namesize));
		buf.extend_from_slice(name.as_bytes());
		buf.push(0);
		while buf.len() % 4 != 0 {
			buf.push(0);
		}
		buf.extend_from_slice(data);
	}

	#[test]
	fn empty_root_has_no_entries() {
		let fs = MemFs::new();
		let root = fs.open("").unwrap();
		assert!(root.iterate(0).unwrap().is_none());
	}

	#[test]
	fn initramfs_load_then_listing_finds_file() {
		let fs = MemFs::new();
		let mut image = Vec::new();
		push_entry(&mut image, MODE_REG | 0o644, "hello.txt", b"hi");
		push_entry(&mut image, 0, "TRAILER!!!", &[]);
		fs.load_initramfs(&image).unwrap();

		let root = fs.open("").unwrap();
		let (entry, next) = root.iterate(0).unwrap().unwrap();
		assert_eq!(entry.name.as_str(), "hello.txt");
		assert!(root.iterate(next).unwrap().is_none());

		let fd = fs.open("hello.txt").unwrap();
		let mut buf = [0u8; 2];
		assert_eq!(fd.read(&mut buf).unwrap(), 2);
		assert_eq!(&buf, b"hi");
	}
}
