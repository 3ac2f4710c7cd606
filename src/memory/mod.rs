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

//! Physical and virtual memory management.
//!
//! This module glues the buddy frame allocator ([`buddy`]), the slab allocator ([`malloc`]) and
//! the per-process address space manager ([`vmem`]) into the facade the rest of the kernel calls:
//! [`alloc_pages`]/[`free_pages`] for frames, [`kmalloc`]/[`kfree`] for the kernel heap, and
//! [`phys2virt`]/[`virt2phys`] for the direct map.

pub mod buddy;
pub mod fault;
pub mod malloc;
pub mod vmem;

use core::fmt;
use utils::errno::{AllocError, AllocResult};

/// Size of one page, in bytes.
pub const PAGE_SIZE: usize = utils::limits::PAGE_SIZE;
/// Base virtual address of the kernel's direct-mapped window.
pub const DIRECT_MAP_BASE: usize = 0xC000_0000;
/// Size of the direct-mapped window: the first 896 MiB of physical memory.
pub const DIRECT_MAP_SIZE: usize = 896 * 1024 * 1024;
/// Lowest virtual address of the user range.
pub const USER_START: usize = 0x4000_0000;
/// One-past-the-last virtual address of the user range.
pub const USER_END: usize = 0xC000_0000;
/// Maximum buddy order, giving a maximum compound allocation of 2^20 frames.
pub const MAX_ORDER: u8 = 20;

/// Base virtual address of the small fixed window reserved for device MMIO (the local APIC and
/// I/O APIC registers), just above the direct map so it shares the same kernel page-directory
/// slots across every address space.
pub const MMIO_WINDOW_BASE: usize = DIRECT_MAP_BASE + DIRECT_MAP_SIZE;

/// A physical memory address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(pub usize);

impl PhysAddr {
	/// Returns the frame number for this address.
	pub const fn pfn(self) -> usize {
		self.0 / PAGE_SIZE
	}

	/// Returns whether the address is aligned on a page boundary.
	pub const fn is_page_aligned(self) -> bool {
		self.0 % PAGE_SIZE == 0
	}

	/// Returns the kernel virtual address this physical address is mapped at in the direct map,
	/// or `None` if it falls outside that window.
	pub fn virt(self) -> Option<VirtAddr> {
		if self.0 < DIRECT_MAP_SIZE {
			Some(VirtAddr(self.0 + DIRECT_MAP_BASE))
		} else {
			None
		}
	}
}

impl fmt::Display for PhysAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:#010x}", self.0)
	}
}

/// A virtual memory address, in either a kernel or user address space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
	/// Returns whether the address is aligned on a page boundary.
	pub const fn is_page_aligned(self) -> bool {
		self.0 % PAGE_SIZE == 0
	}

	/// Rounds the address down to the containing page boundary.
	pub const fn page_align_down(self) -> Self {
		Self(self.0 & !(PAGE_SIZE - 1))
	}

	/// Rounds the address up to the next page boundary.
	pub const fn page_align_up(self) -> Self {
		Self((self.0 + PAGE_SIZE - 1) & !(PAGE_SIZE - 1))
	}

	/// Returns the physical address a direct-map kernel pointer corresponds to, or `None` if this
	/// address does not lie in the direct-mapped window.
	pub fn phys(self) -> Option<PhysAddr> {
		if self.0 >= DIRECT_MAP_BASE && self.0 < DIRECT_MAP_BASE + DIRECT_MAP_SIZE {
			Some(PhysAddr(self.0 - DIRECT_MAP_BASE))
		} else {
			None
		}
	}

	/// Returns whether this address lies inside the user range.
	pub const fn is_user(self) -> bool {
		self.0 >= USER_START && self.0 < USER_END
	}

	/// Returns a raw pointer equal to this address.
	pub const fn as_ptr<T>(self) -> *mut T {
		self.0 as *mut T
	}
}

impl fmt::Display for VirtAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:#010x}", self.0)
	}
}

/// Memory zones, classified by the kind of physical address range they cover.
///
/// Every frame belongs to exactly one zone; allocation prefers `Normal`, falling back to `High`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Zone {
	/// Below 16 MiB: reserved for legacy DMA-capable devices.
	Dma,
	/// The directly-mapped region above DMA and below the high zone.
	Normal,
	/// Physical memory above the direct map, never permanently mapped.
	High,
}

/// Allocates `2^order` contiguous physical frames in the given zone preference order (`Normal`
/// then `High`), returning the physical address of the first frame.
pub fn alloc_pages(order: u8) -> AllocResult<PhysAddr> {
	for zone in [Zone::Normal, Zone::High, Zone::Dma] {
		if let Some(addr) = buddy::zone(zone).allocate(order) {
			return Ok(addr);
		}
	}
	Err(AllocError)
}

/// Frees a `2^order`-frame run previously returned by [`alloc_pages`].
pub fn free_pages(addr: PhysAddr, order: u8) {
	buddy::zone_for(addr).free(addr, order);
}

/// Increments the reference count of the frame (or compound) at `addr`.
pub fn increment_ref(addr: PhysAddr, order: u8) {
	buddy::zone_for(addr).increment_ref(addr, order);
}

/// Decrements the reference count of the frame (or compound) at `addr`, freeing it if it reaches
/// zero.
pub fn decrement_ref(addr: PhysAddr, order: u8) {
	buddy::zone_for(addr).decrement_ref(addr, order);
}

/// Converts a direct-mapped physical address to its kernel virtual address.
pub fn phys2virt(addr: PhysAddr) -> VirtAddr {
	addr.virt().expect("physical address outside the direct map")
}

/// Converts a kernel virtual address inside the direct map to its physical address.
pub fn virt2phys(addr: VirtAddr) -> PhysAddr {
	addr.phys().expect("virtual address outside the direct map")
}

/// Allocates `size` bytes from the kernel heap. Delegates to the slab allocator for sizes up to
/// one of its classes, otherwise rounds up to whole frames.
pub fn kmalloc(size: usize) -> AllocResult<VirtAddr> {
	malloc::kmalloc(size)
}

/// Frees a block previously returned by [`kmalloc`].
///
/// # Safety
///
/// `ptr` must have been returned by [`kmalloc`] and not already freed.
pub unsafe fn kfree(ptr: VirtAddr) {
	unsafe { malloc::kfree(ptr) }
}
