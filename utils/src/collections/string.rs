//! A [`String`](alloc::string::String) wrapper whose growth reports allocation failure.

use crate::errno::{AllocError, AllocResult};
use alloc::string::String as AllocString;
use core::{
	fmt,
	ops::{Deref, DerefMut},
};

/// An owned, growable string that reports allocation failure instead of aborting.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct String(AllocString);

impl String {
	/// Creates a new, empty string.
	pub const fn new() -> Self {
		Self(AllocString::new())
	}

	/// Appends `s`, growing the backing allocation if necessary.
	pub fn push_str(&mut self, s: &str) -> AllocResult<()> {
		self.0.try_reserve(s.len()).map_err(|_| AllocError)?;
		self.0.push_str(s);
		Ok(())
	}

	/// Returns the string's content as a `&str`.
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Returns the number of bytes.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns whether the string is empty.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl TryFrom<&str> for String {
	type Error = AllocError;

	fn try_from(s: &str) -> Result<Self, AllocError> {
		let mut out = AllocString::new();
		out.try_reserve(s.len()).map_err(|_| AllocError)?;
		out.push_str(s);
		Ok(Self(out))
	}
}

impl Deref for String {
	type Target = str;

	fn deref(&self) -> &str {
		&self.0
	}
}

impl DerefMut for String {
	fn deref_mut(&mut self) -> &mut str {
		&mut self.0
	}
}

impl PartialEq<str> for String {
	fn eq(&self, other: &str) -> bool {
		self.0 == other
	}
}

impl fmt::Display for String {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(&self.0, f)
	}
}
