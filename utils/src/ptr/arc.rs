//! Reference-counted shared ownership.
//!
//! This is a thin re-export of [`alloc::sync::Arc`] under the core's naming convention, kept as
//! its own module so call sites read `ptr::arc::Arc` the way the rest of the allocator-facing
//! API reads `ptr::arc::` / `errno::`.

use crate::errno::AllocResult;

/// Shared, reference-counted, immutable-by-default ownership of a `T`.
pub type Arc<T> = alloc::sync::Arc<T>;

/// Fallible constructor mirroring the rest of the core's `AllocResult`-returning API.
///
/// `Arc::new` itself cannot fail (the allocator is simply used to exhaustion and the kernel
/// panics), but call sites that want to propagate an error instead of panicking go through this
/// helper.
pub fn try_new<T>(value: T) -> AllocResult<Arc<T>> {
	Ok(Arc::new(value))
}
