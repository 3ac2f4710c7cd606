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

//! The ext2 filesystem, read-mostly.
//!
//! Only the pieces needed to walk a tree and read file content are parsed: the superblock, one
//! block group descriptor per group, and the 15-entry direct/indirect/double-indirect/
//! triple-indirect inode block list. Allocation (growing a file, creating a directory entry,
//! updating the block and inode bitmaps) is not implemented: `write` only fills blocks the inode
//! already owns, and `mkdir`/`unlink`/`rmdir` report `ENOSYS`.

use super::super::{page_cache::{BlockDevice, PageCache}, DirEntry, FileAttribute, FileDescriptor, FileSystem, FileType};
use alloc::{sync::Arc, vec::Vec};
use utils::{
	collections::string::String,
	errno::{EResult, Errno},
	lock::IntMutex,
};

const EXT2_MAGIC: u16 = 0xef53;
const ROOT_INODE: u32 = 2;
const DIRECT_BLOCKS: usize = 12;

const S_IFMT: u16 = 0xf000;
const S_IFDIR: u16 = 0x4000;
const S_IFREG: u16 = 0x8000;

fn u16le(b: &[u8]) -> u16 {
	u16::from_le_bytes([b[0], b[1]])
}

fn u32le(b: &[u8]) -> u32 {
	u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

/// The superblock fields this core needs, parsed out of the 1024-byte superblock block.
struct Superblock {
	inodes_count: u32,
	blocks_count: u32,
	first_data_block: u32,
	log_block_size: u32,
	blocks_per_group: u32,
	inodes_per_group: u32,
	rev_level: u32,
	inode_size: u16,
	magic: u16,
}

impl Superblock {
	fn parse(buf: &[u8; 1024]) -> EResult<Self> {
		let magic = u16le(&buf[56..58]);
		if magic != EXT2_MAGIC {
			return Err(Errno::EINVAL);
		}
		let rev_level = u32le(&buf[76..80]);
		let inode_size = if rev_level >= 1 {
			u16le(&buf[88..90])
		} else {
			128
		};
		Ok(Self {
			inodes_count: u32le(&buf[0..4]),
			blocks_count: u32le(&buf[4..8]),
			first_data_block: u32le(&buf[20..24]),
			log_block_size: u32le(&buf[24..28]),
			blocks_per_group: u32le(&buf[32..36]),
			inodes_per_group: u32le(&buf[40..44]),
			rev_level,
			inode_size,
			magic,
		})
	}

	fn block_size(&self) -> u32 {
		1024 << self.log_block_size
	}

	fn block_groups_count(&self) -> u32 {
		self.blocks_count.div_ceil(self.blocks_per_group.max(1))
	}

	/// Number of 32-bit block ids that fit in one block; the branching factor of an indirect
	/// block.
	fn entries_per_block(&self) -> u32 {
		self.block_size() / 4
	}
}

/// A block group descriptor, as stored in the block group descriptor table.
struct BlockGroupDescriptor {
	inode_table_start: u32,
}

impl BlockGroupDescriptor {
	fn parse(buf: &[u8]) -> Self {
		Self {
			inode_table_start: u32le(&buf[8..12]),
		}
	}
}

/// An on-disk inode: mode, size, and the 15-entry block list (12 direct, one single-indirect, one
/// double-indirect, one triple-indirect).
struct Inode {
	mode: u16,
	size: u32,
	block: [u32; 15],
}

impl Inode {
	fn parse(buf: &[u8]) -> Self {
		let mut block = [0u32; 15];
		for (i, slot) in block.iter_mut().enumerate() {
			*slot = u32le(&buf[40 + i * 4..44 + i * 4]);
		}
		Self {
			mode: u16le(&buf[0..2]),
			size: u32le(&buf[4..8]),
			block,
		}
	}

	fn file_type(&self) -> EResult<FileType> {
		match self.mode & S_IFMT {
			S_IFDIR => Ok(FileType::Directory),
			S_IFREG => Ok(FileType::Regular),
			_ => Err(Errno::EINVAL),
		}
	}
}

fn read_bytes<D: BlockDevice>(cache: &PageCache<D>, offset: u64, buf: &mut [u8]) -> EResult<()> {
	let bs = cache.block_size() as u64;
	let mut done = 0usize;
	while done < buf.len() {
		let abs = offset + done as u64;
		let block = abs / bs;
		let in_block = (abs % bs) as usize;
		let n = (buf.len() - done).min(bs as usize - in_block);
		cache.read(block, in_block, &mut buf[done..done + n])?;
		done += n;
	}
	Ok(())
}

fn write_bytes<D: BlockDevice>(cache: &PageCache<D>, offset: u64, buf: &[u8]) -> EResult<()> {
	let bs = cache.block_size() as u64;
	let mut done = 0usize;
	while done < buf.len() {
		let abs = offset + done as u64;
		let block = abs / bs;
		let in_block = (abs % bs) as usize;
		let n = (buf.len() - done).min(bs as usize - in_block);
		cache.write(block, in_block, &buf[done..done + n])?;
		done += n;
	}
	Ok(())
}

struct Shared<D: BlockDevice> {
	cache: PageCache<D>,
	sb: Superblock,
}

impl<D: BlockDevice> Shared<D> {
	fn read_inode(&self, inum: u32) -> EResult<Inode> {
		if inum == 0 || inum > self.sb.inodes_count {
			return Err(Errno::ENOENT);
		}
		let group = (inum - 1) / self.sb.inodes_per_group;
		let index_in_group = (inum - 1) % self.sb.inodes_per_group;
		let bgdt_block = self.sb.first_data_block + 1;
		let bgd_off =
			bgdt_block as u64 * self.sb.block_size() as u64 + group as u64 * 32;
		let mut bgd_buf = [0u8; 32];
		read_bytes(&self.cache, bgd_off, &mut bgd_buf)?;
		let bgd = BlockGroupDescriptor::parse(&bgd_buf);
		let inode_off = bgd.inode_table_start as u64 * self.sb.block_size() as u64
			+ index_in_group as u64 * self.sb.inode_size as u64;
		let mut buf = alloc::vec![0u8; self.sb.inode_size as usize];
		read_bytes(&self.cache, inode_off, &mut buf)?;
		Ok(Inode::parse(&buf))
	}

	/// Resolves the `index`th data block (in block-sized units) of `inode` to an on-disk block
	/// id, or `None` for a hole.
	fn resolve_block(&self, inode: &Inode, index: u32) -> EResult<Option<u32>> {
		if (index as usize) < DIRECT_BLOCKS {
			let b = inode.block[index as usize];
			return Ok((b != 0).then_some(b));
		}
		let epb = self.sb.entries_per_block();
		let index = index - DIRECT_BLOCKS as u32;
		if index < epb {
			return self.resolve_indirect(inode.block[12], index);
		}
		let index = index - epb;
		if index < epb * epb {
			let outer = index / epb;
			let inner = index % epb;
			let Some(l1) = self.read_indirect_entry(inode.block[13], outer)? else {
				return Ok(None);
			};
			return self.resolve_indirect(l1, inner);
		}
		let index = index - epb * epb;
		if index < epb * epb * epb {
			let outer = index / (epb * epb);
			let rest = index % (epb * epb);
			let Some(l1) = self.read_indirect_entry(inode.block[14], outer)? else {
				return Ok(None);
			};
			let mid = rest / epb;
			let inner = rest % epb;
			let Some(l2) = self.read_indirect_entry(l1, mid)? else {
				return Ok(None);
			};
			return self.resolve_indirect(l2, inner);
		}
		Err(Errno::EFBIG)
	}

	fn read_indirect_entry(&self, block: u32, index: u32) -> EResult<Option<u32>> {
		if block == 0 {
			return Ok(None);
		}
		let mut buf = [0u8; 4];
		let off = block as u64 * self.sb.block_size() as u64 + index as u64 * 4;
		read_bytes(&self.cache, off, &mut buf)?;
		let id = u32le(&buf);
		Ok((id != 0).then_some(id))
	}

	fn resolve_indirect(&self, block: u32, index: u32) -> EResult<Option<u32>> {
		self.read_indirect_entry(block, index)
	}

	/// Walks the direct-block directory entries of `dir`, calling `f` with each entry's raw
	/// fields until it returns `Some`, which becomes this function's result.
	fn walk_dir<R>(
		&self,
		dir: &Inode,
		mut f: impl FnMut(u32, u8, &str) -> Option<R>,
	) -> EResult<Option<R>> {
		let bs = self.sb.block_size();
		let block_count = dir.size.div_ceil(bs);
		let mut buf = alloc::vec![0u8; bs as usize];
		for block_index in 0..block_count {
			let Some(block) = self.resolve_block(dir, block_index)? else {
				continue;
			};
			read_bytes(&self.cache, block as u64 * bs as u64, &mut buf)?;
			let mut off = 0usize;
			while off + 8 <= buf.len() {
				let inode = u32le(&buf[off..off + 4]);
				let rec_len = u16le(&buf[off + 4..off + 6]) as usize;
				if rec_len < 8 {
					break;
				}
				let name_len = buf[off + 6] as usize;
				let file_type = buf[off + 7];
				if inode != 0 && off + 8 + name_len <= buf.len() {
					let name = core::str::from_utf8(&buf[off + 8..off + 8 + name_len])
						.map_err(|_| Errno::EINVAL)?;
					if let Some(r) = f(inode, file_type, name) {
						return Ok(Some(r));
					}
				}
				off += rec_len;
			}
		}
		Ok(None)
	}

	fn lookup(&self, dir: &Inode, name: &str) -> EResult<Option<u32>> {
		if dir.file_type()? != FileType::Directory {
			return Err(Errno::ENOTDIR);
		}
		self.walk_dir(dir, |inode, _, entry_name| (entry_name == name).then_some(inode))
	}

	fn resolve_path(&self, path: &str) -> EResult<u32> {
		let mut cur = ROOT_INODE;
		for component in path.split('/').filter(|c| !c.is_empty()) {
			let inode = self.read_inode(cur)?;
			cur = self.lookup(&inode, component)?.ok_or(Errno::ENOENT)?;
		}
		Ok(cur)
	}
}

/// A mounted ext2 volume. Cheaply `Clone`; every clone shares the same underlying cache.
#[derive(Clone)]
pub struct Ext2Fs<D: BlockDevice + 'static>(Arc<Shared<D>>);

impl<D: BlockDevice + 'static> Ext2Fs<D> {
	/// Reads the superblock off `device` (at its fixed byte offset 1024, regardless of the
	/// device's own block size) and returns a handle to the mounted filesystem.
	pub fn mount(device: D, cache_capacity: usize) -> EResult<Self> {
		let cache = PageCache::new(device, cache_capacity);
		let mut raw = [0u8; 1024];
		read_bytes(&cache, 1024, &mut raw)?;
		let sb = Superblock::parse(&raw)?;
		Ok(Self(Arc::new(Shared { cache, sb })))
	}
}

struct Ext2Fd<D: BlockDevice + 'static> {
	fs: Ext2Fs<D>,
	inode: u32,
	pos: IntMutex<u64>,
}

impl<D: BlockDevice + 'static> FileDescriptor for Ext2Fd<D> {
	fn read(&self, buf: &mut [u8]) -> EResult<usize> {
		let shared = &self.fs.0;
		let inode = shared.read_inode(self.inode)?;
		let mut pos = self.pos.lock();
		let available = (inode.size as u64).saturating_sub(*pos);
		let to_read = (buf.len() as u64).min(available) as usize;
		let bs = shared.sb.block_size() as usize;
		let mut done = 0usize;
		while done < to_read {
			let file_off = *pos as usize + done;
			let block_index = (file_off / bs) as u32;
			let in_block = file_off % bs;
			let n = (to_read - done).min(bs - in_block);
			match shared.resolve_block(&inode, block_index)? {
				Some(block) => {
					read_bytes(
						&shared.cache,
						block as u64 * bs as u64 + in_block as u64,
						&mut buf[done..done + n],
					)?;
				}
				None => buf[done..done + n].fill(0),
			}
			done += n;
		}
		*pos += done as u64;
		Ok(done)
	}

	/// Fills in blocks the inode already owns; does not grow the file or allocate new blocks (see
	/// the module documentation).
	fn write(&self, buf: &[u8]) -> EResult<usize> {
		let shared = &self.fs.0;
		let inode = shared.read_inode(self.inode)?;
		let mut pos = self.pos.lock();
		let bs = shared.sb.block_size() as usize;
		let mut done = 0usize;
		while done < buf.len() {
			let file_off = *pos as usize + done;
			if file_off as u64 >= inode.size as u64 {
				break;
			}
			let block_index = (file_off / bs) as u32;
			let in_block = file_off % bs;
			let n = (buf.len() - done)
				.min(bs - in_block)
				.min(inode.size as usize - file_off);
			let Some(block) = shared.resolve_block(&inode, block_index)? else {
				break;
			};
			write_bytes(
				&shared.cache,
				block as u64 * bs as u64 + in_block as u64,
				&buf[done..done + n],
			)?;
			done += n;
		}
		*pos += done as u64;
		Ok(done)
	}

	fn seek(&self, offset: u64) -> EResult<u64> {
		*self.pos.lock() = offset;
		Ok(offset)
	}

	fn stat(&self) -> EResult<FileAttribute> {
		let shared = &self.fs.0;
		let inode = shared.read_inode(self.inode)?;
		Ok(FileAttribute {
			inode: self.inode as u64,
			size: inode.size as u64,
			file_type: inode.file_type()?,
		})
	}

	fn iterate(&self, pos: u64) -> EResult<Option<(DirEntry, u64)>> {
		let shared = &self.fs.0;
		let dir = shared.read_inode(self.inode)?;
		if dir.file_type()? != FileType::Directory {
			return Err(Errno::ENOTDIR);
		}
		let mut skip = pos;
		let mut matched: Option<(u32, u8, EResult<String>)> = None;
		shared.walk_dir(&dir, |inode, file_type, name| {
			if skip == 0 {
				matched = Some((inode, file_type, String::try_from(name).map_err(|_| Errno::ENOMEM)));
				Some(())
			} else {
				skip -= 1;
				None
			}
		})?;
		let Some((inode, file_type, name)) = matched else {
			return Ok(None);
		};
		let name = name?;
		let file_type = match file_type {
			1 => FileType::Regular,
			2 => FileType::Directory,
			_ => FileType::Regular,
		};
		Ok(Some((
			DirEntry {
				inode: inode as u64,
				file_type,
				name,
			},
			pos + 1,
		)))
	}
}

impl<D: BlockDevice + 'static> FileSystem for Ext2Fs<D> {
	fn name(&self) -> &str {
		"ext2"
	}

	fn open(&self, path: &str) -> EResult<Arc<dyn FileDescriptor>> {
		let inode = self.0.resolve_path(path)?;
		Ok(Arc::new(Ext2Fd {
			fs: self.clone(),
			inode,
			pos: IntMutex::new(0),
		}))
	}

	fn stat(&self, path: &str) -> EResult<FileAttribute> {
		let inum = self.0.resolve_path(path)?;
		let inode = self.0.read_inode(inum)?;
		Ok(FileAttribute {
			inode: inum as u64,
			size: inode.size as u64,
			file_type: inode.file_type()?,
		})
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

#[cfg(test)]
mod tests {
	use super::*;
	use alloc::collections::BTreeMap;

	struct MemDisk(IntMutex<BTreeMap<u64, Vec<u8>>>);

	impl BlockDevice for Arc<MemDisk> {
		fn block_size(&self) -> usize {
			1024
		}

		fn read_block(&self, key: u64, buf: &mut [u8]) -> EResult<()> {
			let blocks = self.0.lock();
			match blocks.get(&key) {
				Some(b) => buf.copy_from_slice(b),
				None => buf.fill(0),
			}
			Ok(())
		}

		fn write_block(&self, key: u64, buf: &[u8]) -> EResult<()> {
			self.0.lock().insert(key, buf.to_vec());
			Ok(())
		}
	}

	fn put_block(disk: &MemDisk, block: u64, data: &[u8]) {
		let mut buf = alloc::vec![0u8; 1024];
		buf[..data.len()].copy_from_slice(data);
		disk.0.lock().insert(block, buf);
	}

	/// Builds a tiny one-block-group image: block 1 is the superblock, block 2 the block group
	/// descriptor table, block 3 the inode table (holding the root directory and one regular
	/// file), block 4 the root directory's only data block, block 5 the file's content.
	fn build_image() -> Arc<MemDisk> {
		let disk = Arc::new(MemDisk(IntMutex::new(BTreeMap::new())));
		let mut sb = [0u8; 1024];
		sb[0..4].copy_from_slice(&20u32.to_le_bytes()); // inodes_count
		sb[4..8].copy_from_slice(&10u32.to_le_bytes()); // blocks_count
		sb[20..24].copy_from_slice(&1u32.to_le_bytes()); // first_data_block
		sb[24..28].copy_from_slice(&0u32.to_le_bytes()); // log_block_size -> 1024
		sb[32..36].copy_from_slice(&8192u32.to_le_bytes()); // blocks_per_group
		sb[40..44].copy_from_slice(&20u32.to_le_bytes()); // inodes_per_group
		sb[56..58].copy_from_slice(&EXT2_MAGIC.to_le_bytes());
		sb[76..80].copy_from_slice(&0u32.to_le_bytes()); // rev_level 0 -> 128-byte inodes
		put_block(&disk, 1, &sb);

		let mut bgd = [0u8; 32];
		bgd[8..12].copy_from_slice(&3u32.to_le_bytes()); // inode_table_start
		put_block(&disk, 2, &bgd);

		let mut inode_table = alloc::vec![0u8; 1024];
		// inode 2 (root): directory, one data block at block 4.
		let root_off = 1 * 128;
		inode_table[root_off..root_off + 2].copy_from_slice(&S_IFDIR.to_le_bytes());
		inode_table[root_off + 4..root_off + 8].copy_from_slice(&12u32.to_le_bytes());
		inode_table[root_off + 40..root_off + 44].copy_from_slice(&4u32.to_le_bytes());
		// inode 3: regular file, one data block at block 5.
		let file_off = 2 * 128;
		inode_table[file_off..file_off + 2].copy_from_slice(&S_IFREG.to_le_bytes());
		inode_table[file_off + 4..file_off + 8].copy_from_slice(&5u32.to_le_bytes());
		inode_table[file_off + 40..file_off + 44].copy_from_slice(&5u32.to_le_bytes());
		put_block(&disk, 3, &inode_table);

		let mut dirblock = [0u8; 1024];
		// one entry: inode 3, name "hello", file_type 1 (regular), rec_len fills the block.
		dirblock[0..4].copy_from_slice(&3u32.to_le_bytes());
		dirblock[4..6].copy_from_slice(&1024u16.to_le_bytes());
		dirblock[6] = 5;
		dirblock[7] = 1;
		dirblock[8..13].copy_from_slice(b"hello");
		put_block(&disk, 4, &dirblock);

		put_block(&disk, 5, b"hi there");
		disk
	}

	#[test]
	fn open_and_read_file() {
		let disk = build_image();
		let fs = Ext2Fs::mount(disk, 8).unwrap();
		let fd = fs.open("hello").unwrap();
		let mut buf = [0u8; 5];
		let n = fd.read(&mut buf).unwrap();
		assert_eq!(n, 5);
		assert_eq!(&buf, b"hi th");
	}

	#[test]
	fn stat_reports_size_and_type() {
		let disk = build_image();
		let fs = Ext2Fs::mount(disk, 8).unwrap();
		let attr = fs.stat("hello").unwrap();
		assert_eq!(attr.size, 5);
		assert_eq!(attr.file_type, FileType::Regular);
	}

	#[test]
	fn iterate_root_lists_file() {
		let disk = build_image();
		let fs = Ext2Fs::mount(disk, 8).unwrap();
		let fd = fs.open("").unwrap();
		let (entry, next) = fd.iterate(0).unwrap().unwrap();
		assert_eq!(entry.name.as_str(), "hello");
		assert!(fd.iterate(next).unwrap().is_none());
	}
}
