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

//! The per-CPU SMP scheduler: one run queue per core, FIFO within a core, no cross-core ordering
//! guarantee.
//!
//! There is no explicit context-switch routine here. [`crate::arch::x86::idt::dispatch`] already
//! captures the interrupted task's registers into its [`Task`] before calling a handler and
//! writes back whatever task is current afterwards; `schedule` only has to change which `Arc<Task>`
//! a core calls current; the trap return does the rest.

use crate::{
	arch::x86::{cpuid, idt::IntFrame, tss, write_cr3},
	process::{Context, State, Task},
};
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use utils::{collections::vec::Vec, lock::IntMutex, ptr::arc::Arc};

/// Upper bound on the number of cores the per-CPU run queue array provisions space for, shared
/// with [`gdt`](crate::arch::x86::gdt) and [`tss`](crate::arch::x86::tss).
pub const MAX_CPUS: usize = crate::arch::x86::gdt::MAX_CPUS;

/// Timer interrupt frequency every core's local APIC (or the PIT, on the legacy controller) is
/// programmed to during boot. The unit every `ticks` field and argument in this module is
/// counted in.
pub const TICK_HZ: u32 = 100;

/// A FIFO of ready tasks, backed by a plain growable array.
///
/// `pop_front` rotates the backing slice so the head becomes the tail and then pops it; with the
/// handful of ready tasks a single core juggles at once this is cheaper than it sounds and avoids
/// pulling in an intrusive-list crate for one queue.
struct RunQueue(Vec<Arc<Task>>);

impl RunQueue {
	const fn new() -> Self {
		Self(Vec::new())
	}

	fn push_back(&mut self, task: Arc<Task>) -> utils::errno::AllocResult<()> {
		self.0.push(task)
	}

	fn pop_front(&mut self) -> Option<Arc<Task>> {
		if self.0.is_empty() {
			return None;
		}
		self.0.rotate_left(1);
		self.0.pop()
	}

	fn len(&self) -> usize {
		self.0.len()
	}
}

/// One core's scheduling state.
struct CpuScheduler {
	run_queue: IntMutex<RunQueue>,
	/// The task currently running on this core, or `None` before [`init_cpu`] has run.
	current: IntMutex<Option<Arc<Task>>>,
	/// This core's idle task, run whenever its queue is empty. Never enqueued.
	idle: IntMutex<Option<Arc<Task>>>,
	/// Ticks this core's timer has delivered since boot.
	ticks: AtomicU64,
}

impl CpuScheduler {
	const fn new() -> Self {
		Self {
			run_queue: IntMutex::new(RunQueue::new()),
			current: IntMutex::new(None),
			idle: IntMutex::new(None),
			ticks: AtomicU64::new(0),
		}
	}
}

static CPUS: [CpuScheduler; MAX_CPUS] = {
	const INIT: CpuScheduler = CpuScheduler::new();
	[INIT; MAX_CPUS]
};

/// Physical address of the shared kernel page directory, loaded into CR3 by every AP as it comes
/// up. Set once by [`set_kernel_directory`] before [`crate::arch::x86::smp::bring_up_aps`] runs.
static KERNEL_CR3: AtomicU32 = AtomicU32::new(0);

/// Records `dir` as the address space every core shares while in kernel code, for APs to load
/// during bringup.
pub fn set_kernel_directory(dir: &crate::memory::vmem::PageDirectory) {
	KERNEL_CR3.store(dir.phys_addr().0 as u32, Ordering::Release);
}

/// Returns the local APIC id of the calling core, used as the index into [`CPUS`] everywhere in
/// this module.
fn this_cpu() -> usize {
	cpuid::local_apic_id() as usize
}

/// Registers `idle` as the idle task for `cpu_id` and makes it current. Must run once per core,
/// before that core's timer is enabled.
pub fn init_cpu(cpu_id: usize, idle: Arc<Task>) {
	idle.set_state(State::Running);
	*CPUS[cpu_id].idle.lock() = Some(idle.clone());
	*CPUS[cpu_id].current.lock() = Some(idle);
}

/// The entry point [`crate::arch::x86::smp::ap_entry`] calls once this AP has loaded its GDT, IDT
/// and TSS slot: loads the shared kernel address space and confirms this core's idle task (already
/// registered by the BSP via [`init_cpu`] before startup IPIs were sent) is in place.
pub fn ap_start(cpu_id: usize) {
	unsafe {
		write_cr3(KERNEL_CR3.load(Ordering::Acquire));
	}
	debug_assert!(CPUS[cpu_id].current.lock().is_some(), "AP started with no idle task registered");
}

/// Creates a new task and enqueues it as ready on whichever core its affinity mask and last-run
/// hint suggest.
#[allow(clippy::too_many_arguments)]
pub fn spawn(
	name: &str,
	context: Arc<Context>,
	regs: crate::process::regs::Registers,
	kernel_stack_top: u32,
	kernel_stack_order: Option<u8>,
	user_stack_top: u32,
	priority: u8,
	affinity: u32,
) -> utils::errno::AllocResult<Arc<Task>> {
	let task = Task::new(
		name,
		context,
		regs,
		kernel_stack_top,
		kernel_stack_order,
		user_stack_top,
		priority,
		affinity,
	)?;
	enqueue(task.clone())?;
	Ok(task)
}

/// Picks a target core for `task` (its last-run core if still allowed, otherwise the lowest
/// allowed id) and appends it to that core's run queue.
fn enqueue(task: Arc<Task>) -> utils::errno::AllocResult<()> {
	let last = task.last_cpu.load(Ordering::Relaxed) as usize;
	let target = if last < MAX_CPUS && task.can_run_on(last) {
		last
	} else {
		(0..MAX_CPUS).find(|&id| task.can_run_on(id)).unwrap_or(0)
	};
	task.set_state(State::Ready);
	CPUS[target].run_queue.lock().push_back(task)
}

/// Runs `f` against the task currently running on this core, if one has been installed yet.
pub fn with_current<F, R>(f: F) -> Option<R>
where
	F: FnOnce(&Task) -> R,
{
	let cpu = this_cpu();
	let current = CPUS[cpu].current.lock();
	current.as_deref().map(f)
}

/// Returns the task currently running on this core, if one has been installed yet.
pub fn current_task() -> Option<Arc<Task>> {
	CPUS[this_cpu()].current.lock().clone()
}

/// Returns this core's tick count, used by sleeping primitives to compute absolute deadlines.
pub fn ticks() -> u64 {
	CPUS[this_cpu()].ticks.load(Ordering::Relaxed)
}

/// Parks the currently running task and immediately reschedules. With `deadline`, the task sleeps
/// until that absolute tick count ([`Task::sleep_until`]); with `None`, it blocks indefinitely in
/// [`State::Waiting`] until another task wakes it explicitly. Used by sleeping synchronization
/// primitives ([`crate::sync::mutex`]) that park a task until either a timeout or an unlock wakes
/// it back up.
///
/// The task is pushed onto its own core's run queue before rescheduling, the same way a sleeping
/// task is: [`schedule`] skips over it (re-queuing it at the tail) until its state goes back to
/// [`State::Ready`].
pub fn park_current(deadline: Option<u64>) {
	let cpu = this_cpu();
	if let Some(task) = CPUS[cpu].current.lock().clone() {
		match deadline {
			Some(d) => task.sleep_until(d),
			None => task.set_state(State::Waiting),
		}
		let _ = CPUS[cpu].run_queue.lock().push_back(task);
	}
	schedule(cpu);
}

/// Moves a task parked by [`park_current`] back to [`State::Ready`] so the next [`schedule`] on
/// whichever core's queue it sits in picks it up, whether it was sleeping or waiting.
pub fn wake(task: &Arc<Task>) {
	task.set_state(State::Ready);
}

/// Captures `frame` into the task that was current on this core when the trap fired. Called by
/// [`crate::arch::x86::idt::dispatch`] before any handler runs.
pub fn save_current_frame(frame: &IntFrame) {
	let cpu = this_cpu();
	if let Some(task) = CPUS[cpu].current.lock().as_deref() {
		task.regs.lock().capture(frame);
	}
}

/// Overwrites `frame` with whatever task is current on this core now, which a handler (typically
/// the timer tick calling [`schedule`]) may have changed. Called after EOI, before the trap stub's
/// `iret`.
pub fn restore_current_frame(frame: &mut IntFrame) {
	let cpu = this_cpu();
	if let Some(task) = CPUS[cpu].current.lock().as_deref() {
		task.regs.lock().restore_into(frame);
	}
}

/// Points the TSS at the now-current task's kernel stack and reloads CR3 for its address space.
/// Called last in [`crate::arch::x86::idt::dispatch`], after the frame has been restored.
///
/// Always reloads CR3 rather than comparing against the previous value first: an unconditional
/// `mov cr3` is cheap next to the trap itself and keeps this path branch-free.
pub fn update_tss_for_current() {
	let cpu = this_cpu();
	if let Some(task) = CPUS[cpu].current.lock().as_deref() {
		tss::set_esp0(cpu, task.kernel_stack_top);
		let cr3 = task.regs.lock().cr3;
		unsafe {
			write_cr3(cr3);
		}
	}
}

/// The timer tick handler: registered against the timer vector during boot. Ticks the current
/// task's time slice and reschedules this core once it runs out.
pub fn on_tick(_frame: &mut IntFrame) {
	let cpu = this_cpu();
	CPUS[cpu].ticks.fetch_add(1, Ordering::Relaxed);
	wake_sleepers(cpu);
	let exhausted = with_current(|task| task.tick()).unwrap_or(true);
	if exhausted {
		schedule(cpu);
	}
}

/// Moves any task sleeping on `cpu`'s queue whose deadline has passed back to ready. Sleeping
/// tasks are kept in the run queue itself (marked [`State::Sleeping`] and skipped by
/// [`schedule`]'s pop) rather than a separate wait list, so this just flips their state back.
fn wake_sleepers(cpu: usize) {
	let now = CPUS[cpu].ticks.load(Ordering::Relaxed);
	let queue = CPUS[cpu].run_queue.lock();
	for task in queue.0.iter() {
		if task.state() == State::Sleeping && task.wake_at() <= now {
			task.set_state(State::Ready);
		}
	}
}

/// Runs the scheduling decision for this core:
///
/// 1. If a non-idle task is current and still runnable, demote it to ready and re-enqueue it at
///    the back of this core's queue.
/// 2. Pop the next ready task from the front of the queue, skipping over any still-sleeping or
///    waiting entries (putting them back at the tail).
/// 3. If the queue is empty, attempt to steal a ready task from another core's queue.
/// 4. Fall back to this core's idle task if neither produced anything to run.
/// 5. Mark it running and reset its time slice.
/// 6. Install it as this core's current task. The actual register switch happens for free the
///    next time [`restore_current_frame`] runs.
pub fn schedule(cpu: usize) {
	let idle = CPUS[cpu].idle.lock().clone();
	{
		let mut run_queue = CPUS[cpu].run_queue.lock();
		let mut current = CPUS[cpu].current.lock();
		if let Some(prev) = current.take() {
			let is_idle = idle.as_ref().is_some_and(|i| Arc::ptr_eq(i, &prev));
			if !is_idle && prev.state() == State::Running {
				prev.set_state(State::Ready);
				let _ = run_queue.push_back(prev);
			}
		}
	}
	let mut next = {
		let mut run_queue = CPUS[cpu].run_queue.lock();
		let mut found = None;
		for _ in 0..run_queue.len() {
			let Some(candidate) = run_queue.pop_front() else {
				break;
			};
			if candidate.state() == State::Ready {
				found = Some(candidate);
				break;
			}
			let _ = run_queue.push_back(candidate);
		}
		found
	};
	// `steal_for` locks other cores' queues, never this one's, so it must run with this core's
	// own run_queue lock already released to avoid two cores deadlocking on each other.
	if next.is_none() {
		next = steal_for(cpu);
	}
	let next = next.or(idle).expect("core has no idle task to fall back on");
	next.set_state(State::Running);
	next.reset_time_slice();
	next.last_cpu.store(cpu as u32, Ordering::Relaxed);
	*CPUS[cpu].current.lock() = Some(next);
}

/// Marks the currently running task on this core as [`State::Sleeping`] until `deadline` (an
/// absolute tick count on this core's clock) and immediately reschedules.
pub fn sleep_until(deadline: u64) {
	let cpu = this_cpu();
	with_current(|task| task.sleep_until(deadline));
	schedule(cpu);
}

/// Marks the currently running task [`State::Terminated`] and reschedules. The task object itself
/// stays alive as long as something still holds an `Arc` to it (its parent, awaiting its exit
/// status); nothing here drops it.
pub fn exit_current() {
	let cpu = this_cpu();
	with_current(|task| task.set_state(State::Terminated));
	schedule(cpu);
}

/// Attempts to steal one ready task from another core's queue onto `cpu`'s, used when `cpu`'s own
/// queue runs dry. Locks are acquired lowest-id-first to avoid the classic two-core deadlock from
/// each trying to steal from the other at the same time; a core never tries to lock its own queue
/// twice, so iterating in increasing order and skipping `cpu` itself is sufficient. Callers must
/// not be holding `cpu`'s own run-queue lock when calling this.
///
/// Only a task that is both [`State::Ready`] and able to run on `cpu` is taken; anything else
/// popped off another core's queue is put back at that same queue's tail, exactly as the local
/// scheduling loop does with its own queue.
pub fn steal_for(cpu: usize) -> Option<Arc<Task>> {
	for other in 0..MAX_CPUS {
		if other == cpu {
			continue;
		}
		let mut queue = CPUS[other].run_queue.lock();
		for _ in 0..queue.len() {
			let Some(task) = queue.pop_front() else {
				break;
			};
			if task.state() == State::Ready && task.can_run_on(cpu) {
				return Some(task);
			}
			let _ = queue.push_back(task);
		}
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn run_queue_is_fifo() {
		// `Task` needs a live `Context`; exercise the queue's ordering directly with a type that's
		// cheap to construct instead.
		struct Item(u32);
		struct Queue(Vec<Item>);
		impl Queue {
			fn push_back(&mut self, v: Item) {
				self.0.push(v).unwrap();
			}
			fn pop_front(&mut self) -> Option<Item> {
				if self.0.is_empty() {
					return None;
				}
				self.0.rotate_left(1);
				self.0.pop()
			}
		}
		let mut q = Queue(Vec::new());
		q.push_back(Item(1));
		q.push_back(Item(2));
		q.push_back(Item(3));
		assert_eq!(q.pop_front().unwrap().0, 1);
		assert_eq!(q.pop_front().unwrap().0, 2);
		assert_eq!(q.pop_front().unwrap().0, 3);
		assert!(q.pop_front().is_none());
	}
}
