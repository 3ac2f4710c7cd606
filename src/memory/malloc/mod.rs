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

//! Sub-page allocator backing the kernel heap.
//!
//! Each size class {8, 16, 32, 64, 128, 256, 512, 1024, 2048} owns three lists of slabs: full,
//! partial and free. A slab is one page laid out as `[header | objects...]`, with the objects'
//! free entries threaded through a list embedded in the objects themselves. Allocations above the
//! largest class go straight to the frame allocator.

mod global;

use super::{PAGE_SIZE, PhysAddr, VirtAddr, alloc_pages, decrement_ref, phys2virt, virt2phys};
use core::ptr;
use utils::{
	errno::{AllocError, AllocResult},
	lock::Spin,
};

/// The size classes served by the slab allocator, in ascending order.
const CLASSES: [usize; 9] = [8, 16, 32, 64, 128, 256, 512, 1024, 2048];

/// Picks the smallest class able to hold `size`, or `None` if `size` exceeds the largest class.
fn class_for(size: usize) -> Option<usize> {
	CLASSES.iter().position(|&c| c >= size)
}

#[repr(C)]
struct FreeObj {
	next: Option<ptr::NonNull<FreeObj>>,
}

/// One page-sized slab for a given size class.
#[repr(C)]
struct SlabHeader {
	next: Option<ptr::NonNull<SlabHeader>>,
	free_list: Option<ptr::NonNull<FreeObj>>,
	/// Number of objects currently allocated out of this slab.
	inuse: u16,
	/// Total number of objects this slab holds.
	capacity: u16,
	class: u8,
}

impl SlabHeader {
	fn objects_base(&mut self) -> *mut u8 {
		let header_size = core::mem::size_of::<SlabHeader>();
		(self as *mut Self as *mut u8).wrapping_add(header_size)
	}
}

struct ClassList {
	full: Option<ptr::NonNull<SlabHeader>>,
	partial: Option<ptr::NonNull<SlabHeader>>,
	free: Option<ptr::NonNull<SlabHeader>>,
}

impl ClassList {
	const fn new() -> Self {
		Self {
			full: None,
			partial: None,
			free: None,
		}
	}
}

struct SlabAllocator {
	classes: [ClassList; CLASSES.len()],
}

impl SlabAllocator {
	const fn new() -> Self {
		Self {
			classes: [
				ClassList::new(),
				ClassList::new(),
				ClassList::new(),
				ClassList::new(),
				ClassList::new(),
				ClassList::new(),
				ClassList::new(),
				ClassList::new(),
				ClassList::new(),
			],
		}
	}

	unsafe fn new_slab(class_idx: usize) -> AllocResult<ptr::NonNull<SlabHeader>> {
		let phys = alloc_pages(0)?;
		let virt = phys2virt(phys);
		let obj_size = CLASSES[class_idx];
		let header_size = core::mem::size_of::<SlabHeader>();
		let capacity = ((PAGE_SIZE - header_size) / obj_size) as u16;
		let header = virt.as_ptr::<SlabHeader>();
		unsafe {
			header.write(SlabHeader {
				next: None,
				free_list: None,
				inuse: 0,
				capacity,
				class: class_idx as u8,
			});
			let mut base = (*header).objects_base();
			for _ in 0..capacity {
				let obj = base as *mut FreeObj;
				obj.write(FreeObj {
					next: (*header).free_list,
				});
				(*header).free_list = ptr::NonNull::new(obj);
				base = base.wrapping_add(obj_size);
			}
			Ok(ptr::NonNull::new_unchecked(header))
		}
	}

	unsafe fn alloc(&mut self, class_idx: usize) -> AllocResult<VirtAddr> {
		let list = &mut self.classes[class_idx];
		let slab = if let Some(s) = list.partial {
			s
		} else if let Some(s) = list.free {
			list.free = unsafe { (*s.as_ptr()).next };
			unsafe {
				(*s.as_ptr()).next = list.partial;
			}
			list.partial = Some(s);
			s
		} else {
			let s = unsafe { Self::new_slab(class_idx)? };
			unsafe {
				(*s.as_ptr()).next = list.partial;
			}
			list.partial = Some(s);
			s
		};
		unsafe {
			let header = slab.as_ptr();
			let obj = (*header).free_list.expect("slab on partial/free list has no free object");
			(*header).free_list = (*obj.as_ptr()).next;
			(*header).inuse += 1;
			if (*header).inuse == (*header).capacity {
				list.partial = (*header).next;
				(*header).next = list.full;
				list.full = Some(slab);
			}
			Ok(VirtAddr(obj.as_ptr() as usize))
		}
	}

	unsafe fn free(&mut self, class_idx: usize, ptr: VirtAddr) {
		let page = ptr.0 & !(PAGE_SIZE - 1);
		let header = page as *mut SlabHeader;
		unsafe {
			let was_full = (*header).inuse == (*header).capacity;
			let obj = ptr.0 as *mut FreeObj;
			obj.write(FreeObj {
				next: (*header).free_list,
			});
			(*header).free_list = ptr::NonNull::new(obj);
			(*header).inuse -= 1;
			let list = &mut self.classes[class_idx];
			if was_full {
				Self::unlink(&mut list.full, header);
				(*header).next = list.partial;
				list.partial = ptr::NonNull::new(header);
			} else if (*header).inuse == 0 {
				Self::unlink(&mut list.partial, header);
				(*header).next = list.free;
				list.free = ptr::NonNull::new(header);
			}
		}
	}

	unsafe fn unlink(head: &mut Option<ptr::NonNull<SlabHeader>>, target: *mut SlabHeader) {
		unsafe {
			if head.map(|h| h.as_ptr()) == Some(target) {
				*head = (*target).next;
				return;
			}
			let mut cur = *head;
			while let Some(c) = cur {
				let next = (*c.as_ptr()).next;
				if next.map(|n| n.as_ptr()) == Some(target) {
					(*c.as_ptr()).next = (*target).next;
					return;
				}
				cur = next;
			}
		}
	}
}

unsafe impl Send for SlabAllocator {}

static SLAB: Spin<SlabAllocator> = Spin::new(SlabAllocator::new());

/// Allocates `size` bytes from the kernel heap.
pub fn kmalloc(size: usize) -> AllocResult<VirtAddr> {
	match class_for(size) {
		Some(idx) => {
			let mut slab = SLAB.lock();
			unsafe { slab.alloc(idx) }
		}
		None => {
			let pages = size.div_ceil(PAGE_SIZE);
			let order = utils::math::order_for_pages(pages);
			let phys = alloc_pages(order)?;
			Ok(phys2virt(phys))
		}
	}
}

/// Frees a block previously returned by [`kmalloc`].
///
/// # Safety
///
/// `ptr` must have been returned by [`kmalloc`] and must not already have been freed.
pub unsafe fn kfree(ptr: VirtAddr) {
	if ptr.0 % PAGE_SIZE == 0 {
		// A page-aligned pointer is always a large (multi-frame) allocation: the buddy allocator
		// records its order on the compound's head frame, so freeing the head's single frame's
		// worth of ref-count is enough to trigger the real free.
		decrement_ref(virt2phys(ptr), 0);
		return;
	}
	let page = VirtAddr(ptr.0 & !(PAGE_SIZE - 1));
	let header = page.as_ptr::<SlabHeader>();
	let class_idx = unsafe { (*header).class as usize };
	let mut slab = SLAB.lock();
	unsafe {
		slab.free(class_idx, ptr);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn class_for_rounds_up() {
		assert_eq!(class_for(1), Some(0));
		assert_eq!(class_for(8), Some(0));
		assert_eq!(class_for(9), Some(1));
		assert_eq!(class_for(2048), Some(8));
		assert_eq!(class_for(2049), None);
	}
}
