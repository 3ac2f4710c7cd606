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

//! System call entry: `int 0x80` trap handling and the syscall number table.
//!
//! Unlike the rest of the trap table, this vector is never registered through
//! [`crate::arch::x86::idt::register`] — [`crate::arch::x86::idt::dispatch`] calls
//! [`dispatch_syscall`] directly, since the return value has to go back through the calling
//! task's own saved register snapshot rather than just mutating the frame.
//!
//! Handlers here are plain functions taking the four argument registers, not the teacher's
//! per-syscall-file/proc-macro argument marshaling: with only a handful of calls to support and no
//! variadic argument-extraction macro in this tree, a flat `(u32, u32, u32, u32) -> EResult<i32>`
//! shape for every handler, with unused arguments just ignored, is the simpler fit.

pub mod fs;
pub mod klog;
pub mod mem;
pub mod process;
pub mod userptr;

use crate::{arch::x86::idt::IntFrame, process::scheduler};
use utils::errno::EResult;

/// A registered syscall handler: the four argument registers in, a return value (negative on
/// error) out.
type Handler = fn(u32, u32, u32, u32) -> EResult<i32>;

fn h_fork(_a: u32, _b: u32, _c: u32, _d: u32) -> EResult<i32> {
	process::fork()
}

fn h_execve(path: u32, argv: u32, envp: u32, _d: u32) -> EResult<i32> {
	process::execve(path, argv, envp)
}

fn h_read(fd: u32, buf: u32, size: u32, _d: u32) -> EResult<i32> {
	fs::read(fd, buf, size)
}

fn h_write(fd: u32, buf: u32, size: u32, _d: u32) -> EResult<i32> {
	fs::write(fd, buf, size)
}

fn h_open(path: u32, _b: u32, _c: u32, _d: u32) -> EResult<i32> {
	fs::open(path)
}

fn h_close(fd: u32, _b: u32, _c: u32, _d: u32) -> EResult<i32> {
	fs::close(fd)
}

fn h_seek(fd: u32, offset: u32, _c: u32, _d: u32) -> EResult<i32> {
	fs::seek(fd, offset)
}

fn h_exit(status: u32, _b: u32, _c: u32, _d: u32) -> EResult<i32> {
	process::exit(status)
}

fn h_getpid(_a: u32, _b: u32, _c: u32, _d: u32) -> EResult<i32> {
	process::getpid()
}

fn h_nanosleep(req: u32, rem: u32, _c: u32, _d: u32) -> EResult<i32> {
	process::nanosleep(req, rem)
}

fn h_stat(path: u32, out: u32, _c: u32, _d: u32) -> EResult<i32> {
	fs::stat(path, out)
}

fn h_mkdir(path: u32, _b: u32, _c: u32, _d: u32) -> EResult<i32> {
	fs::mkdir(path)
}

fn h_unlink(path: u32, _b: u32, _c: u32, _d: u32) -> EResult<i32> {
	fs::unlink(path)
}

fn h_rmdir(path: u32, _b: u32, _c: u32, _d: u32) -> EResult<i32> {
	fs::rmdir(path)
}

fn h_log(msg: u32, len: u32, _c: u32, _d: u32) -> EResult<i32> {
	klog::log(msg, len)
}

fn h_chdir(path: u32, _b: u32, _c: u32, _d: u32) -> EResult<i32> {
	fs::chdir(path)
}

fn h_getcwd(buf: u32, size: u32, _c: u32, _d: u32) -> EResult<i32> {
	fs::getcwd(buf, size)
}

/// Number of slots in the syscall table. The numbered syscalls in use here top out well below
/// this; it leaves the same headroom the vector table does.
const TABLE_SIZE: usize = 256;

static TABLE: [Option<Handler>; TABLE_SIZE] = {
	let mut t: [Option<Handler>; TABLE_SIZE] = [None; TABLE_SIZE];
	t[1] = Some(h_fork as Handler);
	t[2] = Some(h_execve as Handler);
	t[3] = Some(h_open as Handler);
	t[4] = Some(h_read as Handler);
	t[5] = Some(h_write as Handler);
	t[6] = Some(h_close as Handler);
	t[7] = Some(h_seek as Handler);
	t[8] = Some(h_exit as Handler);
	t[9] = Some(h_getpid as Handler);
	t[10] = Some(h_nanosleep as Handler);
	t[11] = Some(h_stat as Handler);
	t[12] = Some(h_mkdir as Handler);
	t[13] = Some(h_unlink as Handler);
	t[14] = Some(h_rmdir as Handler);
	t[15] = Some(fs::getdents as Handler);
	t[16] = Some(h_log as Handler);
	t[17] = Some(h_chdir as Handler);
	// 18 is deliberately unassigned.
	t[19] = Some(h_getcwd as Handler);
	t[20] = Some(mem::mmap as Handler);
	t
};

/// Reads the four argument registers and the syscall number out of `frame`, looks the number up
/// in [`TABLE`], and writes the result back into the calling task's saved register snapshot.
/// `frame` itself is about to be overwritten by
/// [`scheduler::restore_current_frame`](crate::process::scheduler::restore_current_frame)
/// regardless of which task ends up current, so there is no point writing the result there too.
pub fn dispatch_syscall(frame: &mut IntFrame) {
	let number = frame.eax as usize;
	let value = match TABLE.get(number).copied().flatten() {
		Some(handler) => match handler(frame.ebx, frame.ecx, frame.edx, frame.esi) {
			Ok(v) => v,
			Err(e) => e.as_int(),
		},
		// An unregistered number is simply -1, not one of the registered errnos.
		None => -1,
	};
	if let Some(task) = scheduler::current_task() {
		task.regs.lock().set_return(value);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn table_has_gap_at_18() {
		assert!(TABLE[18].is_none());
	}

	#[test]
	fn table_covers_registered_range() {
		for n in 1..=17 {
			assert!(TABLE[n].is_some(), "syscall {n} should be registered");
		}
		assert!(TABLE[19].is_some());
		assert!(TABLE[20].is_some());
	}
}
