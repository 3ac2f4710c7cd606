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

//! The `#[global_allocator]` the `alloc` crate calls into, wrapping [`super::kmalloc`]/
//! [`super::kfree`].
//!
//! The slab allocator classes by size only; `Layout::align()` beyond what a class's own size
//! already guarantees (every class is a power of two, so an N-byte class is N-aligned) is not
//! honored. Nothing in this tree currently asks for over-aligned heap allocations, so this is a
//! deliberate simplification rather than an oversight — see `DESIGN.md`.

use super::{kfree, kmalloc};
use crate::memory::VirtAddr;
use core::alloc::{GlobalAlloc, Layout};

struct KernelAllocator;

unsafe impl GlobalAlloc for KernelAllocator {
	unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
		match kmalloc(layout.size()) {
			Ok(VirtAddr(addr)) => addr as *mut u8,
			Err(_) => core::ptr::null_mut(),
		}
	}

	unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
		unsafe { kfree(VirtAddr(ptr as usize)) }
	}
}

#[global_allocator]
static ALLOCATOR: KernelAllocator = KernelAllocator;

/// Called once, from the panic handler's allocation-error hook, since `alloc`'s own default abort
/// path has nothing useful to print on a `no_std` target.
#[alloc_error_handler]
fn alloc_error(layout: Layout) -> ! {
	panic!("allocation failure: {} bytes (align {})", layout.size(), layout.align());
}
