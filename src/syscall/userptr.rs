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

//! Validated access to user memory from inside a syscall handler.
//!
//! A syscall is a software trap, not a context switch: the interrupted task's page directory is
//! still loaded in CR3 when the handler runs, so a user-supplied address is just a pointer into
//! the current address space. Every function here checks the pointer against the current
//! context's VMA list before dereferencing it, the same bounds the page-fault handler would
//! otherwise enforce the hard way.

use crate::{memory::VirtAddr, process::scheduler};
use alloc::vec::Vec;
use utils::{
	collections::string::String,
	errno::{EResult, Errno},
};

/// Upper bound on a path or log message read out of user memory in one call.
const MAX_STRING: usize = 4096;

/// Copies `len` bytes starting at user address `addr` into a freshly allocated buffer.
pub fn copy_from_user(addr: u32, len: usize) -> EResult<Vec<u8>> {
	let start = VirtAddr(addr as usize);
	let current = scheduler::current_task().ok_or(Errno::ESRCH)?;
	let mem_space = current.context.mem_space.lock();
	if !mem_space.can_access(start, len, false) {
		return Err(Errno::EFAULT);
	}
	let mut buf = Vec::new();
	buf.try_reserve_exact(len).map_err(|_| Errno::ENOMEM)?;
	// SAFETY: `can_access` confirmed `len` readable bytes starting at `start`.
	unsafe {
		core::ptr::copy_nonoverlapping(start.as_ptr::<u8>(), buf.as_mut_ptr(), len);
		buf.set_len(len);
	}
	Ok(buf)
}

/// Copies `data` to user address `addr`.
pub fn copy_to_user(addr: u32, data: &[u8]) -> EResult<()> {
	let start = VirtAddr(addr as usize);
	let current = scheduler::current_task().ok_or(Errno::ESRCH)?;
	let mem_space = current.context.mem_space.lock();
	if !mem_space.can_access(start, data.len(), true) {
		return Err(Errno::EFAULT);
	}
	// SAFETY: `can_access` confirmed `data.len()` writable bytes starting at `start`.
	unsafe {
		core::ptr::copy_nonoverlapping(data.as_ptr(), start.as_ptr::<u8>(), data.len());
	}
	Ok(())
}

/// Copies a NUL-terminated string out of user memory, rejecting anything past [`MAX_STRING`]
/// bytes or that crosses into memory the current task can't read.
pub fn copy_user_str(addr: u32) -> EResult<String> {
	let current = scheduler::current_task().ok_or(Errno::ESRCH)?;
	let mem_space = current.context.mem_space.lock();
	let mut bytes = Vec::new();
	for i in 0..MAX_STRING {
		let byte_addr = VirtAddr(addr as usize + i);
		if !mem_space.can_access(byte_addr, 1, false) {
			return Err(Errno::EFAULT);
		}
		// SAFETY: `can_access` confirmed this single byte is readable.
		let byte = unsafe { *byte_addr.as_ptr::<u8>() };
		if byte == 0 {
			let s = core::str::from_utf8(&bytes).map_err(|_| Errno::EINVAL)?;
			return String::try_from(s).map_err(Errno::from);
		}
		bytes.try_reserve(1).map_err(|_| Errno::ENOMEM)?;
		bytes.push(byte);
	}
	Err(Errno::ENAMETOOLONG)
}
