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

//! Loading a program image into a fresh address space, for `execve`.

pub mod elf;

use crate::{
	memory::{PhysAddr, VirtAddr, vmem::PageDirectory},
	process::mem_space::{MemSpace, PROT_READ, PROT_WRITE, VmaKind},
};
use alloc::vec::Vec;
use utils::errno::{EResult, Errno};

/// Load bias applied to `ET_DYN` (position-independent) images. `ET_EXEC` images ignore this and
/// load at the addresses their program headers name.
const DYN_LOAD_BASE: usize = 0x0800_0000;

/// The outcome of a successful [`build`]: the address space to install and the register values
/// the caller should start the task at.
pub struct Loaded {
	pub space: MemSpace,
	pub entry: u32,
	pub stack_top: u32,
}

/// Writes `s` (plus a NUL terminator) onto the stack just below `*cursor`, 4-byte aligned, moving
/// `*cursor` down to the start of what it wrote and returning that address.
fn write_string(space: &MemSpace, cursor: &mut usize, s: &[u8]) -> EResult<u32> {
	*cursor -= s.len() + 1;
	*cursor &= !0x3;
	elf::write_mapped(space, VirtAddr(*cursor), s)?;
	elf::write_mapped(space, VirtAddr(*cursor + s.len()), &[0])?;
	Ok(*cursor as u32)
}

/// Builds a fresh address space for `image`, maps a stack, and writes `argv`/`envp` (each a list
/// of NUL-free byte strings) onto it in the conventional `argc; argv[]; NULL; envp[]; NULL;
/// strings` layout a freshly `execve`d ELF entry point expects.
pub fn build(kernel: &PageDirectory, image: &[u8], argv: &[Vec<u8>], envp: &[Vec<u8>]) -> EResult<Loaded> {
	let mut space = MemSpace::new(kernel)?;
	let entry = elf::load(image, &mut space, DYN_LOAD_BASE)?;
	let stack_start = space.allocate_area(crate::process::USER_STACK_SIZE, PROT_READ | PROT_WRITE, VmaKind::Stack)?;
	let stack_end = stack_start.0 + crate::process::USER_STACK_SIZE;

	// Lay out strings downward from the top of the stack, then the argv/envp pointer arrays and
	// argc below them, so the initial ESP lands exactly on argc.
	let mut cursor = stack_end;
	let mut argv_ptrs = Vec::new();
	for a in argv {
		argv_ptrs.try_reserve(1).map_err(|_| Errno::ENOMEM)?;
		argv_ptrs.push(write_string(&space, &mut cursor, a)?);
	}
	let mut envp_ptrs = Vec::new();
	for e in envp {
		envp_ptrs.try_reserve(1).map_err(|_| Errno::ENOMEM)?;
		envp_ptrs.push(write_string(&space, &mut cursor, e)?);
	}

	// Below the strings, write the pointer tables (each NULL-terminated) and argc, leaving the
	// final ESP page-aligned the way the System V i386 ABI expects.
	let mut words = Vec::new();
	words.try_reserve(3 + argv_ptrs.len() + envp_ptrs.len()).map_err(|_| Errno::ENOMEM)?;
	words.push(argv_ptrs.len() as u32);
	words.extend_from_slice(&argv_ptrs);
	words.push(0);
	words.extend_from_slice(&envp_ptrs);
	words.push(0);
	cursor -= words.len() * 4;
	cursor &= !0xf;
	for (i, word) in words.iter().enumerate() {
		elf::write_mapped(&space, VirtAddr(cursor + i * 4), &word.to_le_bytes())?;
	}

	Ok(Loaded {
		space,
		entry,
		stack_top: cursor as u32,
	})
}

/// The buddy order of the frame run a `size`-byte kernel stack needs. Shared between
/// [`alloc_kernel_stack`] and the caller, which must record the same order on the owning
/// [`Task`](crate::process::Task) so it can be freed when the task is dropped.
pub fn kernel_stack_order(size: usize) -> u8 {
	(size.div_ceil(crate::memory::PAGE_SIZE)).next_power_of_two().trailing_zeros() as u8
}

/// Allocates a run of physical frames for an address space's kernel stack. `execve` reuses the
/// calling task's existing kernel stack (only the user-space image changes), so this is only
/// needed by `fork`, which needs a second one for the child.
pub fn alloc_kernel_stack(size: usize) -> EResult<PhysAddr> {
	crate::memory::alloc_pages(kernel_stack_order(size)).map_err(Errno::from)
}
