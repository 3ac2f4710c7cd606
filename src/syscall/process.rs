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

//! `fork`, `execve`, `exit`, `getpid` and `nanosleep`.

use crate::{
	file::vfs,
	process::{self, KERNEL_STACK_SIZE, exec, regs::Registers, scheduler},
	syscall::userptr,
};
use alloc::vec::Vec;
use utils::errno::{EResult, Errno};

/// Duplicates the calling task's context and enqueues the copy as a new, independently scheduled
/// task. Returns the child's task id to the parent; the child itself is given a register snapshot
/// that makes it return `0` from this same `int 0x80` the first time it runs.
pub fn fork() -> EResult<i32> {
	let current = scheduler::current_task().ok_or(Errno::ESRCH)?;
	let kernel = process::kernel_directory();
	let child_context = current.context.fork(&kernel)?;
	let child_context = utils::ptr::arc::try_new(child_context)?;

	let mut child_regs = *current.regs.lock();
	child_regs.set_return(0);
	child_regs.cr3 = child_context.mem_space.lock().directory().phys_addr().0 as u32;

	let stack_phys = exec::alloc_kernel_stack(KERNEL_STACK_SIZE)?;
	let kernel_stack_top = (crate::memory::phys2virt(stack_phys).0 + KERNEL_STACK_SIZE) as u32;
	let kernel_stack_order = exec::kernel_stack_order(KERNEL_STACK_SIZE);

	let child = scheduler::spawn(
		current.name.as_str(),
		child_context,
		child_regs,
		kernel_stack_top,
		Some(kernel_stack_order),
		current.user_stack_top,
		current.priority,
		current.affinity,
	)?;
	Ok(child.id as i32)
}

/// Replaces the calling task's address space with the image at `path`, passing `argv`/`envp` on
/// the new stack, and jumps to its entry point. Never returns to the caller on success: the
/// task's saved registers are overwritten wholesale.
pub fn execve(path_addr: u32, argv_addr: u32, envp_addr: u32) -> EResult<i32> {
	let path = userptr::copy_user_str(path_addr)?;
	let argv = read_string_array(argv_addr)?;
	let envp = read_string_array(envp_addr)?;

	let file = vfs::open(path.as_str())?;
	let attr = file.stat()?;
	let mut image = Vec::new();
	image.try_reserve_exact(attr.size as usize).map_err(|_| Errno::ENOMEM)?;
	let mut read = 0usize;
	while read < attr.size as usize {
		let mut chunk = [0u8; 4096];
		let n = file.read(&mut chunk)?;
		if n == 0 {
			break;
		}
		image.try_reserve(n).map_err(|_| Errno::ENOMEM)?;
		image.extend_from_slice(&chunk[..n]);
		read += n;
	}

	let kernel = process::kernel_directory();
	let loaded = exec::build(&kernel, &image, &argv, &envp)?;
	let cr3 = loaded.space.directory().phys_addr().0 as u32;

	let current = scheduler::current_task().ok_or(Errno::ESRCH)?;
	*current.context.mem_space.lock() = loaded.space;
	*current.regs.lock() = Registers::user_entry(loaded.entry, loaded.stack_top, cr3);
	Ok(0)
}

/// Reads a NULL-terminated array of NUL-terminated user strings (the `argv`/`envp` convention)
/// into owned byte buffers.
fn read_string_array(addr: u32) -> EResult<Vec<Vec<u8>>> {
	let mut out = Vec::new();
	if addr == 0 {
		return Ok(out);
	}
	for i in 0.. {
		let entry = userptr::copy_from_user(addr + i * 4, 4)?;
		let ptr = u32::from_le_bytes(entry.try_into().unwrap());
		if ptr == 0 {
			break;
		}
		let s = userptr::copy_user_str(ptr)?;
		out.try_reserve(1).map_err(|_| Errno::ENOMEM)?;
		out.push(Vec::from(s.as_str().as_bytes()));
	}
	Ok(out)
}

/// Marks the calling task exited with `status` and reschedules. The time-slice machinery never
/// runs this task again.
pub fn exit(status: u32) -> EResult<i32> {
	if let Some(task) = scheduler::current_task() {
		task.set_exit_status(status);
	}
	scheduler::exit_current();
	Ok(0)
}

/// Returns the calling task's id.
pub fn getpid() -> EResult<i32> {
	let current = scheduler::current_task().ok_or(Errno::ESRCH)?;
	Ok(current.id as i32)
}

/// A `struct timespec` as laid out by user code: seconds then nanoseconds, both 32-bit here since
/// this core has no 64-bit time type.
#[repr(C)]
struct Timespec {
	sec: u32,
	nsec: u32,
}

/// Sleeps the calling task for approximately the duration named by the `timespec` at `req`,
/// converted to scheduler ticks. `rem`, if non-null, is left zeroed: sleeps here are never
/// interrupted early.
pub fn nanosleep(req_addr: u32, rem_addr: u32) -> EResult<i32> {
	let bytes = userptr::copy_from_user(req_addr, core::mem::size_of::<Timespec>())?;
	// SAFETY: `bytes` is exactly `size_of::<Timespec>()` long, and `Timespec` accepts any bit
	// pattern.
	let req: Timespec = unsafe { core::ptr::read_unaligned(bytes.as_ptr().cast()) };
	let ticks = (req.sec as u64) * scheduler::TICK_HZ as u64 + (req.nsec as u64 * scheduler::TICK_HZ as u64) / 1_000_000_000;
	let deadline = scheduler::ticks() + ticks.max(1);
	scheduler::sleep_until(deadline);
	if rem_addr != 0 {
		userptr::copy_to_user(rem_addr, &[0; core::mem::size_of::<Timespec>()])?;
	}
	Ok(0)
}
