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

//! Block-keyed page cache sitting between [`super::fs::ext2`] and the block device.
//!
//! Eviction is best-effort FIFO: once the cache is at its configured capacity, a new `get` evicts
//! the oldest clean page to make room, or refuses to add a dirty one. A real implementation should
//! pick an LRU or CLOCK policy instead; this core does not claim to.

use alloc::collections::BTreeMap;
use utils::errno::{EResult, Errno};

/// Opaque identifier for one block on a backing device.
pub type PageKey = u64;

/// A capability to fetch and persist fixed-size blocks, implemented by block device drivers (an
/// ATA disk in particular).
pub trait BlockDevice: Send + Sync {
	/// Size in bytes of one block.
	fn block_size(&self) -> usize;

	/// Reads the block numbered `key` into `buf`, which must be exactly `block_size()` long.
	fn read_block(&self, key: PageKey, buf: &mut [u8]) -> EResult<()>;

	/// Writes `buf`, which must be exactly `block_size()` long, to the block numbered `key`.
	fn write_block(&self, key: PageKey, buf: &[u8]) -> EResult<()>;
}

struct Page {
	data: alloc::vec::Vec<u8>,
	dirty: bool,
	/// Insertion order, used for FIFO eviction.
	seq: u64,
}

struct Inner {
	pages: BTreeMap<PageKey, Page>,
	cap: usize,
	next_seq: u64,
}

/// A bounded cache of blocks read through a [`BlockDevice`].
pub struct PageCache<D: BlockDevice> {
	device: D,
	inner: utils::lock::IntMutex<Inner>,
}

impl<D: BlockDevice> PageCache<D> {
	/// Creates a cache over `device` holding at most `cap` pages at once.
	pub fn new(device: D, cap: usize) -> Self {
		Self {
			device,
			inner: utils::lock::IntMutex::new(Inner {
				pages: BTreeMap::new(),
				cap,
				next_seq: 0,
			}),
		}
	}

	fn evict_one(inner: &mut Inner) {
		let Some((&oldest_key, _)) = inner
			.pages
			.iter()
			.filter(|(_, p)| !p.dirty)
			.min_by_key(|(_, p)| p.seq)
		else {
			return;
		};
		inner.pages.remove(&oldest_key);
	}

	/// Loads the block for `key` into the cache if absent, then runs `f` on its buffer.
	fn with_page<R>(&self, key: PageKey, f: impl FnOnce(&mut Page) -> R) -> EResult<R> {
		let mut inner = self.inner.lock();
		if !inner.pages.contains_key(&key) {
			if inner.pages.len() >= inner.cap {
				Self::evict_one(&mut inner);
			}
			let mut data = alloc::vec![0u8; self.device.block_size()];
			self.device.read_block(key, &mut data)?;
			let seq = inner.next_seq;
			inner.next_seq += 1;
			if inner.pages.len() < inner.cap.max(1) {
				inner.pages.insert(
					key,
					Page {
						data,
						dirty: false,
						seq,
					},
				);
			} else {
				// Cache is at (or, after a failed FIFO eviction, still at) capacity with only
				// dirty pages; proceed without caching this read rather than growing unbounded.
				return Ok(f(&mut Page {
					data,
					dirty: false,
					seq,
				}));
			}
		}
		let page = inner.pages.get_mut(&key).expect("page inserted or returned above");
		Ok(f(page))
	}

	/// Reads `len` bytes at `offset` within block `key` into `buf`.
	pub fn read(&self, key: PageKey, offset: usize, buf: &mut [u8]) -> EResult<usize> {
		self.with_page(key, |page| {
			let n = buf.len().min(page.data.len().saturating_sub(offset));
			buf[..n].copy_from_slice(&page.data[offset..offset + n]);
			n
		})
	}

	/// Writes `buf` at `offset` within block `key`, marking the page dirty.
	pub fn write(&self, key: PageKey, offset: usize, buf: &[u8]) -> EResult<usize> {
		self.with_page(key, |page| {
			let n = buf.len().min(page.data.len().saturating_sub(offset));
			page.data[offset..offset + n].copy_from_slice(&buf[..n]);
			page.dirty = true;
			n
		})
	}

	/// Removes `key` from the cache without writing back any dirty content.
	pub fn invalidate(&self, key: PageKey) {
		self.inner.lock().pages.remove(&key);
	}

	/// Writes `key`'s buffer back to the device if dirty, then clears the dirty flag.
	pub fn flush(&self, key: PageKey) -> EResult<()> {
		let mut inner = self.inner.lock();
		let Some(page) = inner.pages.get_mut(&key) else {
			return Ok(());
		};
		if page.dirty {
			self.device.write_block(key, &page.data)?;
			page.dirty = false;
		}
		Ok(())
	}

	/// Flushes every dirty page.
	pub fn flush_all(&self) -> EResult<()> {
		let keys: alloc::vec::Vec<PageKey> = {
			let inner = self.inner.lock();
			inner.pages.iter().filter(|(_, p)| p.dirty).map(|(&k, _)| k).collect()
		};
		for key in keys {
			self.flush(key)?;
		}
		Ok(())
	}

	/// Returns the device's block size.
	pub fn block_size(&self) -> usize {
		self.device.block_size()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloc::{sync::Arc, vec::Vec};
	use utils::lock::IntMutex;

	struct MemDevice {
		blocks: IntMutex<alloc::collections::BTreeMap<u64, Vec<u8>>>,
		bs: usize,
	}

	impl BlockDevice for Arc<MemDevice> {
		fn block_size(&self) -> usize {
			self.bs
		}

		fn read_block(&self, key: PageKey, buf: &mut [u8]) -> EResult<()> {
			let blocks = self.blocks.lock();
			match blocks.get(&key) {
				Some(b) => buf.copy_from_slice(b),
				None => buf.fill(0),
			}
			Ok(())
		}

		fn write_block(&self, key: PageKey, buf: &[u8]) -> EResult<()> {
			self.blocks.lock().insert(key, buf.to_vec());
			Ok(())
		}
	}

	#[test]
	fn write_then_flush_persists_to_device() {
		let dev = Arc::new(MemDevice {
			blocks: IntMutex::new(alloc::collections::BTreeMap::new()),
			bs: 16,
		});
		let cache = PageCache::new(dev.clone(), 4);
		cache.write(0, 0, b"hello").unwrap();
		assert!(!dev.blocks.lock().contains_key(&0));
		cache.flush(0).unwrap();
		assert_eq!(&dev.blocks.lock().get(&0).unwrap()[0..5], b"hello");
	}

	#[test]
	fn invalidate_drops_without_writeback() {
		let dev = Arc::new(MemDevice {
			blocks: IntMutex::new(alloc::collections::BTreeMap::new()),
			bs: 16,
		});
		let cache = PageCache::new(dev.clone(), 4);
		cache.write(0, 0, b"x").unwrap();
		cache.invalidate(0);
		cache.flush(0).unwrap();
		assert!(!dev.blocks.lock().contains_key(&0));
	}
}
