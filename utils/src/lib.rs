//! Utility types shared between the kernel and its build tooling.
//!
//! This crate has no dependency on the standard library: it only relies on `core` and `alloc`,
//! so it can be linked into the `no_std` kernel binary as well as host-side tools built with the
//! `std` feature.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(warnings)]

extern crate alloc;

pub mod collections;
pub mod errno;
pub mod limits;
pub mod lock;
pub mod math;
pub mod ptr;

/// Returns the size in bits of type `T`.
#[inline]
pub const fn bit_size_of<T>() -> usize {
	core::mem::size_of::<T>() * 8
}

/// A value that can be cloned, but whose cloning may fail because of an allocation failure.
pub trait TryClone: Sized {
	/// The error returned on failure.
	type Error;

	/// Attempts to clone `self`.
	fn try_clone(&self) -> Result<Self, Self::Error>;
}
