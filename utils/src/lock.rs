//! Spinlock primitives.
//!
//! [`Spin`] is a plain busy-wait lock. [`IntMutex`] is the same lock with local interrupts
//! disabled for the duration of the critical section, which is required for locks that may be
//! taken from both normal kernel code and an interrupt handler (the allocator, the page cache,
//! the scheduler's run queues).
//!
//! Sleeping locks that put the waiting task on a wait queue (used for user-facing mutexes) live
//! in the kernel crate's `sync` module, since they need to know about tasks.

use core::{
	cell::UnsafeCell,
	fmt,
	hint,
	ops::{Deref, DerefMut},
	sync::atomic::{AtomicBool, Ordering::{Acquire, Release}},
};

#[cfg(target_arch = "x86")]
#[inline(always)]
fn interrupts_enabled() -> bool {
	let flags: u32;
	unsafe {
		core::arch::asm!("pushfd", "pop {0}", out(reg) flags);
	}
	flags & (1 << 9) != 0
}

#[cfg(target_arch = "x86")]
#[inline(always)]
fn cli() {
	unsafe {
		core::arch::asm!("cli", options(nomem, nostack));
	}
}

#[cfg(target_arch = "x86")]
#[inline(always)]
fn sti() {
	unsafe {
		core::arch::asm!("sti", options(nomem, nostack));
	}
}

#[cfg(not(target_arch = "x86"))]
#[inline(always)]
fn interrupts_enabled() -> bool {
	false
}
#[cfg(not(target_arch = "x86"))]
#[inline(always)]
fn cli() {}
#[cfg(not(target_arch = "x86"))]
#[inline(always)]
fn sti() {}

/// Wraps a value accessed by at most one context at a time, protected by a busy-wait spinlock.
///
/// `MASK_INT` selects whether local interrupts are disabled for the duration of the critical
/// section. Set it when the lock can also be taken from an interrupt handler; leave it clear for
/// locks only ever taken from ordinary kernel control flow.
pub struct Spin<T: ?Sized, const MASK_INT: bool = false> {
	locked: AtomicBool,
	data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send, const MASK_INT: bool> Sync for Spin<T, MASK_INT> {}
unsafe impl<T: ?Sized + Send, const MASK_INT: bool> Send for Spin<T, MASK_INT> {}

impl<T, const MASK_INT: bool> Spin<T, MASK_INT> {
	/// Creates a new lock wrapping `data`.
	pub const fn new(data: T) -> Self {
		Self {
			locked: AtomicBool::new(false),
			data: UnsafeCell::new(data),
		}
	}
}

impl<T: ?Sized, const MASK_INT: bool> Spin<T, MASK_INT> {
	/// Acquires the lock, spinning until it becomes available.
	pub fn lock(&self) -> SpinGuard<'_, T, MASK_INT> {
		let int_state = if MASK_INT {
			let enabled = interrupts_enabled();
			cli();
			enabled
		} else {
			false
		};
		while self.locked.swap(true, Acquire) {
			hint::spin_loop();
		}
		SpinGuard {
			lock: self,
			int_state,
		}
	}

	/// Attempts to acquire the lock without blocking.
	pub fn try_lock(&self) -> Option<SpinGuard<'_, T, MASK_INT>> {
		let int_state = if MASK_INT {
			let enabled = interrupts_enabled();
			cli();
			enabled
		} else {
			false
		};
		if self.locked.swap(true, Acquire) {
			if MASK_INT && int_state {
				sti();
			}
			return None;
		}
		Some(SpinGuard {
			lock: self,
			int_state,
		})
	}
}

impl<T: Default, const MASK_INT: bool> Default for Spin<T, MASK_INT> {
	fn default() -> Self {
		Self::new(T::default())
	}
}

impl<T: ?Sized + fmt::Debug, const MASK_INT: bool> fmt::Debug for Spin<T, MASK_INT> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(&*self.lock(), f)
	}
}

/// RAII guard releasing a [`Spin`] lock when dropped.
pub struct SpinGuard<'l, T: ?Sized, const MASK_INT: bool> {
	lock: &'l Spin<T, MASK_INT>,
	int_state: bool,
}

impl<T: ?Sized, const MASK_INT: bool> Deref for SpinGuard<'_, T, MASK_INT> {
	type Target = T;

	fn deref(&self) -> &T {
		unsafe { &*self.lock.data.get() }
	}
}

impl<T: ?Sized, const MASK_INT: bool> DerefMut for SpinGuard<'_, T, MASK_INT> {
	fn deref_mut(&mut self) -> &mut T {
		unsafe { &mut *self.lock.data.get() }
	}
}

impl<T: ?Sized, const MASK_INT: bool> Drop for SpinGuard<'_, T, MASK_INT> {
	fn drop(&mut self) {
		self.lock.locked.store(false, Release);
		if MASK_INT && self.int_state {
			sti();
		}
	}
}

/// A [`Spin`] that disables local interrupts while locked.
pub type IntMutex<T> = Spin<T, true>;
