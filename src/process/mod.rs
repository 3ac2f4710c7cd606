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

//! Tasks, the address spaces and file tables they share, and the per-CPU scheduler that runs
//! them.
//!
//! A [`Context`] is the resource container a group of tasks can share (its address space and its
//! file descriptor table), modeled separately from [`Task`] so that a future `clone`-style thread
//! can point several tasks at one `Context` without duplicating either. Every task today owns its
//! context exclusively.

pub mod exec;
pub mod mem_space;
pub mod regs;
pub mod scheduler;

use crate::{file::FileDescriptor, memory::vmem::PageDirectory};
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use mem_space::MemSpace;
use regs::Registers;
use utils::{
	collections::string::String,
	errno::{AllocResult, EResult, Errno},
	lock::IntMutex,
	ptr::arc::Arc,
};

/// Number of file descriptor slots a context provides.
pub const MAX_FDS: usize = 256;
/// Size of a task's kernel stack, in bytes.
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;
/// Size of a task's eagerly-backed user stack, in bytes.
pub const USER_STACK_SIZE: usize = 4 * 1024 * 1024;
/// Default time slice granted to a task, in scheduler ticks.
pub const DEFAULT_TIME_SLICE: u32 = 100;

/// A task identifier, unique at any given time.
pub type Tid = u32;

/// Allocates identifiers for new tasks, monotonically. Wrapping is not handled: by the time this
/// counter wraps, the tasks holding the low identifiers are long gone, and a collision would only
/// matter if both were alive simultaneously.
static NEXT_TID: AtomicU32 = AtomicU32::new(1);

fn alloc_tid() -> Tid {
	NEXT_TID.fetch_add(1, Ordering::Relaxed)
}

/// The address space every [`Context`] is forked from: the kernel's own page directory, holding
/// only the shared higher-half mappings. Installed once at boot by [`set_kernel_directory`],
/// after which [`kernel_directory`] hands a copy to `fork`/`execve` and any other syscall that
/// needs to build a fresh [`Context`] at runtime rather than at boot time.
static KERNEL_DIRECTORY: IntMutex<Option<PageDirectory>> = IntMutex::new(None);

/// Records the kernel's page directory for later retrieval via [`kernel_directory`]. Called once
/// during boot, before the first [`Context`] is created.
pub fn set_kernel_directory(dir: PageDirectory) {
	*KERNEL_DIRECTORY.lock() = Some(dir);
}

/// Returns the kernel's page directory, installed by [`set_kernel_directory`] during boot.
pub fn kernel_directory() -> PageDirectory {
	KERNEL_DIRECTORY.lock().expect("kernel page directory not installed yet")
}

/// Resources shared by every task in a context: its address space, open files, and working
/// directory.
pub struct Context {
	/// This context's address space.
	pub mem_space: IntMutex<MemSpace>,
	/// Open file descriptors, indexed by fd number. Slots 0, 1 and 2 start populated with the
	/// console the context was created with, matching the conventional stdin/stdout/stderr
	/// layout.
	fds: IntMutex<[Option<Arc<dyn FileDescriptor>>; MAX_FDS]>,
	/// Current working directory.
	pub cwd: IntMutex<String>,
}

impl Context {
	/// Creates a context with a fresh address space derived from `kernel`, and `console` installed
	/// at descriptors 0 through 2.
	pub fn new(kernel: &PageDirectory, console: Arc<dyn FileDescriptor>) -> EResult<Self> {
		let mem_space = MemSpace::new(kernel)?;
		let mut fds: [Option<Arc<dyn FileDescriptor>>; MAX_FDS] = [const { None }; MAX_FDS];
		fds[0] = Some(console.clone());
		fds[1] = Some(console.clone());
		fds[2] = Some(console);
		Ok(Self {
			mem_space: IntMutex::new(mem_space),
			fds: IntMutex::new(fds),
			cwd: IntMutex::new(String::try_from("/").map_err(|_| Errno::ENOMEM)?),
		})
	}

	/// Returns the file descriptor at `fd`, if open.
	pub fn get_fd(&self, fd: u32) -> EResult<Arc<dyn FileDescriptor>> {
		let fds = self.fds.lock();
		fds.get(fd as usize).and_then(|slot| slot.clone()).ok_or(Errno::EBADF)
	}

	/// Installs `file` at the lowest unused descriptor, returning its number.
	pub fn install_fd(&self, file: Arc<dyn FileDescriptor>) -> EResult<u32> {
		let mut fds = self.fds.lock();
		let slot = fds.iter_mut().position(|s| s.is_none()).ok_or(Errno::EMFILE)?;
		fds[slot] = Some(file);
		Ok(slot as u32)
	}

	/// Installs `file` at exactly descriptor `fd`, replacing whatever was there (as `dup2` does).
	pub fn install_fd_at(&self, fd: u32, file: Arc<dyn FileDescriptor>) -> EResult<()> {
		let mut fds = self.fds.lock();
		let slot = fds.get_mut(fd as usize).ok_or(Errno::EBADF)?;
		*slot = Some(file);
		Ok(())
	}

	/// Closes the descriptor at `fd`.
	pub fn close_fd(&self, fd: u32) -> EResult<()> {
		let mut fds = self.fds.lock();
		let slot = fds.get_mut(fd as usize).ok_or(Errno::EBADF)?;
		if slot.take().is_none() {
			return Err(Errno::EBADF);
		}
		Ok(())
	}

	/// Builds the `fork`ed child of this context: a new address space that is the
	/// copy-on-write duplicate of this one, sharing the exact same descriptor objects (so the
	/// file position each carries is shared between parent and child, matching `fork`'s usual
	/// descriptor semantics) and a copy of the working directory.
	pub fn fork(&self, kernel: &PageDirectory) -> EResult<Self> {
		let mut mem_space = MemSpace::new(kernel)?;
		mem_space.cow_duplicate(&self.mem_space.lock())?;
		Ok(Self {
			mem_space: IntMutex::new(mem_space),
			fds: IntMutex::new(self.fds.lock().clone()),
			cwd: IntMutex::new(self.cwd.lock().clone()),
		})
	}
}

/// A task's lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
	/// Created but never scheduled yet.
	New,
	/// Runnable, sitting in a run queue.
	Ready,
	/// Currently executing on some CPU.
	Running,
	/// Blocked until a deadline (see [`Task::wake_at`]) elapses.
	Sleeping,
	/// Blocked on a resource (a mutex, a wait queue) with no deadline.
	Waiting,
	/// Finished running; resources released but the exit status is still being reaped.
	Terminated,
	/// Fully reaped; the task object is about to be dropped.
	Exited,
}

/// A schedulable thread of execution.
///
/// Every field the scheduler or the trap dispatcher touches directly is public; task-local
/// bookkeeping (state, accumulated runtime) goes through accessor methods instead so the run
/// queue invariants stay in one place.
pub struct Task {
	/// Unique task identifier.
	pub id: Tid,
	/// Human-readable name, for logs and debugging.
	pub name: String,
	/// The resources (address space, fd table) this task runs against.
	pub context: Arc<Context>,

	state: IntMutex<State>,
	/// Scheduling priority: lower runs first when multiple tasks are ready at once.
	pub priority: u8,
	/// Ticks remaining in the task's current time slice.
	time_slice: IntMutex<u32>,
	/// Ticks this task has accumulated running, for accounting.
	runtime_ticks: AtomicU64,
	/// Absolute tick count at which a sleeping task should wake. Meaningless unless `state` is
	/// [`State::Sleeping`].
	wake_at: AtomicU64,
	/// The value passed to `exit`, meaningless until `state` reaches [`State::Terminated`].
	exit_status: AtomicU32,

	/// The task's saved register state. The dispatcher captures into this on every trap entry and
	/// restores from it (possibly a different task's, after a reschedule) on every trap exit.
	pub regs: IntMutex<Registers>,

	/// Top of the kernel stack (`ESP0`): the value loaded into the TSS whenever this task becomes
	/// current.
	pub kernel_stack_top: u32,
	/// Buddy order of the frame run backing `kernel_stack_top`, if this task owns it (allocated by
	/// [`exec::alloc_kernel_stack`](crate::process::exec::alloc_kernel_stack)). `None` for the
	/// handful of boot-time tasks whose kernel stack is instead a linker-reserved range (the BSP's
	/// idle task and its `boot_stack_top`), which this task must not free.
	kernel_stack_order: Option<u8>,
	/// Top of the user stack, for the initial register snapshot; `0` for kernel-only tasks.
	pub user_stack_top: u32,

	/// Bitmask of CPUs this task is allowed to run on (bit `n` set means CPU `n` is allowed).
	pub affinity: u32,
	/// The CPU this task last ran on, used to prefer warm caches when re-enqueuing.
	pub last_cpu: AtomicU32,
}

impl Task {
	/// Creates a new task in the [`State::New`] state, not yet known to any scheduler run queue.
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		name: &str,
		context: Arc<Context>,
		regs: Registers,
		kernel_stack_top: u32,
		kernel_stack_order: Option<u8>,
		user_stack_top: u32,
		priority: u8,
		affinity: u32,
	) -> AllocResult<Arc<Self>> {
		let name = String::try_from(name)?;
		Ok(Arc::new(Self {
			id: alloc_tid(),
			name,
			context,
			state: IntMutex::new(State::New),
			priority,
			time_slice: IntMutex::new(DEFAULT_TIME_SLICE),
			runtime_ticks: AtomicU64::new(0),
			wake_at: AtomicU64::new(0),
			exit_status: AtomicU32::new(0),
			regs: IntMutex::new(regs),
			kernel_stack_top,
			kernel_stack_order,
			user_stack_top,
			affinity,
			last_cpu: AtomicU32::new(u32::MAX),
		}))
	}

	/// Returns the task's current state.
	pub fn state(&self) -> State {
		*self.state.lock()
	}

	/// Sets the task's state directly. Callers holding a run queue lock use this instead of
	/// `compare_exchange`-style helpers since every transition here already happens under the
	/// owning CPU's queue lock.
	pub fn set_state(&self, state: State) {
		*self.state.lock() = state;
	}

	/// Returns whether `cpu_id` is in this task's affinity mask.
	pub fn can_run_on(&self, cpu_id: usize) -> bool {
		cpu_id < 32 && self.affinity & (1 << cpu_id) != 0
	}

	/// Ticks down the task's time slice by one, returning whether it has been exhausted.
	pub fn tick(&self) -> bool {
		self.runtime_ticks.fetch_add(1, Ordering::Relaxed);
		let mut slice = self.time_slice.lock();
		*slice = slice.saturating_sub(1);
		*slice == 0
	}

	/// Resets the task's time slice to the default, done whenever it is handed the CPU again.
	pub fn reset_time_slice(&self) {
		*self.time_slice.lock() = DEFAULT_TIME_SLICE;
	}

	/// Returns the total number of ticks this task has spent running.
	pub fn runtime_ticks(&self) -> u64 {
		self.runtime_ticks.load(Ordering::Relaxed)
	}

	/// Marks the task sleeping until tick count `deadline`.
	pub fn sleep_until(&self, deadline: u64) {
		self.wake_at.store(deadline, Ordering::Relaxed);
		self.set_state(State::Sleeping);
	}

	/// Returns the tick count this sleeping task should be woken at.
	pub fn wake_at(&self) -> u64 {
		self.wake_at.load(Ordering::Relaxed)
	}

	/// Records `status` as this task's exit status, read back once it reaches
	/// [`State::Terminated`].
	pub fn set_exit_status(&self, status: u32) {
		self.exit_status.store(status, Ordering::Relaxed);
	}

	/// Returns the status last recorded by [`Self::set_exit_status`].
	pub fn exit_status(&self) -> u32 {
		self.exit_status.load(Ordering::Relaxed)
	}
}

impl Drop for Task {
	/// Frees the kernel stack's backing frames, if this task owns them (see
	/// [`Self::kernel_stack_order`]'s documentation).
	fn drop(&mut self) {
		if let Some(order) = self.kernel_stack_order {
			let size = crate::memory::PAGE_SIZE << order;
			let base = crate::memory::VirtAddr(self.kernel_stack_top as usize - size);
			let phys = crate::memory::virt2phys(base);
			crate::memory::decrement_ref(phys, order);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	// `Task::new` needs a `Context`, which in turn needs a live kernel page directory and a
	// console file descriptor — neither exists outside a booted kernel. These tests exercise the
	// affinity mask and time-slice bookkeeping directly against the underlying locks instead, the
	// same way `mem_space`'s tests stick to pure PTE-flag logic rather than a whole `MemSpace`.

	#[test]
	fn can_run_on_respects_affinity_mask() {
		let affinity: u32 = 0b0000_0101;
		let can_run = |cpu_id: usize| cpu_id < 32 && affinity & (1 << cpu_id) != 0;
		assert!(can_run(0));
		assert!(!can_run(1));
		assert!(can_run(2));
		assert!(!can_run(32));
	}

	#[test]
	fn time_slice_saturates_at_zero() {
		let slice = IntMutex::new(1u32);
		{
			let mut s = slice.lock();
			*s = s.saturating_sub(1);
		}
		assert_eq!(*slice.lock(), 0);
		{
			let mut s = slice.lock();
			*s = s.saturating_sub(1);
		}
		assert_eq!(*slice.lock(), 0);
	}
}
