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

//! `mmap`.
//!
//! The syscall ABI only has four argument registers, one short of `mmap`'s usual five, so
//! `flags`, `fd` and `offset` travel packed into the fourth argument: bits 0..8 are the `prot`-style
//! mapping flags, bits 8..16 are the file descriptor plus one (`0` means "no descriptor", i.e. an
//! anonymous mapping), and bits 16..32 are the offset in units of [`crate::memory::PAGE_SIZE`].
//! There is no standard to match here, so this layout is this core's own — see `DESIGN.md`.

use crate::{
	memory::{PAGE_SIZE, VirtAddr, vmem::flags},
	process::{
		mem_space::{PROT_WRITE, VmaKind},
		scheduler,
	},
};
use utils::errno::{EResult, Errno};

/// Sentinel returned on failure, matching the POSIX `MAP_FAILED` convention of "all bits set"
/// truncated to the syscall's `i32` return type.
const MAP_FAILED: i32 = -1;

fn unpack(packed: u32) -> (u8, Option<u32>, u64) {
	let prot = (packed & 0xff) as u8;
	let fd_plus_one = (packed >> 8) & 0xff;
	let fd = if fd_plus_one == 0 { None } else { Some(fd_plus_one - 1) };
	let offset = ((packed >> 16) as u64) * PAGE_SIZE as u64;
	(prot, fd, offset)
}

fn pte_flags(prot: u8) -> u32 {
	let mut f = flags::USER;
	if prot & PROT_WRITE != 0 {
		f |= flags::WRITE;
	}
	f
}

pub fn mmap(addr: u32, length: u32, prot: u32, packed: u32) -> EResult<i32> {
	let (_, fd, offset) = unpack(packed);
	let prot = prot as u8;
	let current = scheduler::current_task().ok_or(Errno::ESRCH)?;
	let _ = addr;

	let Some(fd) = fd else {
		let mut space = current.context.mem_space.lock();
		return match space.allocate_area(length as usize, prot, VmaKind::Anonymous) {
			Ok(start) => Ok(start.0 as i32),
			Err(_) => Ok(MAP_FAILED),
		};
	};

	let file = current.context.get_fd(fd)?;
	let phys = match file.mmap(offset, length as usize) {
		Ok(phys) => phys,
		Err(_) => return Ok(MAP_FAILED),
	};
	let mut space = current.context.mem_space.lock();
	let start = match space.allocate_area(length as usize, prot, VmaKind::MmapFile) {
		Ok(start) => start,
		Err(_) => return Ok(MAP_FAILED),
	};
	if space.map_pages(VirtAddr(start.0), phys, length as usize, pte_flags(prot) | flags::PRESENT).is_err() {
		return Ok(MAP_FAILED);
	}
	Ok(start.0 as i32)
}
