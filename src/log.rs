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

//! Kernel logging: a ring buffer every log line is appended to, mirrored to the console device
//! once one is installed.
//!
//! Early boot code runs before [`set_console`] has anything to mirror to; lines written during
//! that window are only in the ring buffer; later reads of the log (via the `log` syscall, or a
//! future debug shell) still see them.

use core::fmt::{self, Write};
use utils::lock::IntMutex;

/// Size of the in-memory log ring buffer, in bytes.
const LOG_SIZE: usize = 128 * 1024;

/// Severity of a log line, lowest to highest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
	Debug,
	Info,
	Warn,
	Error,
}

impl Level {
	fn tag(self) -> &'static str {
		match self {
			Self::Debug => "debug",
			Self::Info => "info",
			Self::Warn => "warn",
			Self::Error => "error",
		}
	}
}

/// Minimum level a line needs to reach the console mirror; the ring buffer always keeps
/// everything regardless of this filter.
static CONSOLE_LEVEL: IntMutex<Level> = IntMutex::new(Level::Debug);

/// Sets the minimum level mirrored to the console. Raised to [`Level::Warn`] or higher on
/// platforms where the console itself is slow enough to matter (a serial line at a low baud
/// rate, for instance).
pub fn set_console_level(level: Level) {
	*CONSOLE_LEVEL.lock() = level;
}

/// A fixed-capacity ring buffer of log bytes, overwriting the oldest bytes once full.
struct RingBuffer {
	buf: [u8; LOG_SIZE],
	write_head: usize,
	len: usize,
}

impl RingBuffer {
	const fn new() -> Self {
		Self {
			buf: [0; LOG_SIZE],
			write_head: 0,
			len: 0,
		}
	}

	fn push(&mut self, bytes: &[u8]) {
		for &b in bytes {
			self.buf[self.write_head] = b;
			self.write_head = (self.write_head + 1) % LOG_SIZE;
			self.len = (self.len + 1).min(LOG_SIZE);
		}
	}

	/// Copies the buffer's current content, oldest byte first, into `out`, returning the number
	/// of bytes copied.
	fn read_into(&self, out: &mut [u8]) -> usize {
		let n = self.len.min(out.len());
		let start = (self.write_head + LOG_SIZE - self.len) % LOG_SIZE;
		for i in 0..n {
			out[i] = self.buf[(start + i) % LOG_SIZE];
		}
		n
	}
}

/// A sink log lines are mirrored to once attached, satisfied by the console device.
pub trait Sink: Send + Sync {
	fn write(&self, bytes: &[u8]);
}

struct Logger {
	ring: RingBuffer,
	sink: Option<&'static dyn Sink>,
	/// Silenced while a panic handler is unwinding its own diagnostics, to avoid a recursive
	/// panic from a faulting console write.
	silent: bool,
}

impl Write for Logger {
	fn write_str(&mut self, s: &str) -> fmt::Result {
		self.ring.push(s.as_bytes());
		if !self.silent {
			if let Some(sink) = self.sink {
				sink.write(s.as_bytes());
			}
		}
		Ok(())
	}
}

static LOGGER: IntMutex<Logger> = IntMutex::new(Logger {
	ring: RingBuffer::new(),
	sink: None,
	silent: false,
});

/// Attaches the console as the logger's mirror sink. Called once, after the console device is
/// brought up during boot.
pub fn set_sink(sink: &'static dyn Sink) {
	LOGGER.lock().sink = Some(sink);
}

/// Silences the console mirror. The ring buffer keeps recording regardless.
pub fn set_silent(silent: bool) {
	LOGGER.lock().silent = silent;
}

/// Copies up to `out.len()` bytes of log history into `out`, oldest first. Backs the `log`
/// syscall's read side.
pub fn read(out: &mut [u8]) -> usize {
	LOGGER.lock().ring.read_into(out)
}

#[doc(hidden)]
pub fn _log(level: Level, args: fmt::Arguments) {
	let mut logger = LOGGER.lock();
	let mirror = !logger.silent && level >= *CONSOLE_LEVEL.lock();
	let prev_silent = logger.silent;
	logger.silent = !mirror;
	let _ = write!(logger, "[{}] ", level.tag());
	let _ = logger.write_fmt(args);
	let _ = logger.write_str("\n");
	logger.silent = prev_silent;
}

/// Writes directly to the log, bypassing level filtering. Used by [`crate::print`] macros and
/// anything that wants the console mirror unconditionally.
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
	let mut logger = LOGGER.lock();
	let _ = logger.write_fmt(args);
}

/// Prints without a trailing newline, mirrored to the console exactly like `std::print!`.
#[macro_export]
macro_rules! print {
	($($arg:tt)*) => {
		$crate::log::_print(format_args!($($arg)*))
	};
}

/// Prints with a trailing newline.
#[macro_export]
macro_rules! println {
	() => {
		$crate::print!("\n")
	};
	($($arg:tt)*) => {
		$crate::log::_print(format_args!("{}\n", format_args!($($arg)*)))
	};
}

/// Logs at [`Level::Debug`].
#[macro_export]
macro_rules! debug {
	($($arg:tt)*) => {
		$crate::log::_log($crate::log::Level::Debug, format_args!($($arg)*))
	};
}

/// Logs at [`Level::Info`].
#[macro_export]
macro_rules! info {
	($($arg:tt)*) => {
		$crate::log::_log($crate::log::Level::Info, format_args!($($arg)*))
	};
}

/// Logs at [`Level::Warn`].
#[macro_export]
macro_rules! warn {
	($($arg:tt)*) => {
		$crate::log::_log($crate::log::Level::Warn, format_args!($($arg)*))
	};
}

/// Logs at [`Level::Error`].
#[macro_export]
macro_rules! error {
	($($arg:tt)*) => {
		$crate::log::_log($crate::log::Level::Error, format_args!($($arg)*))
	};
}

pub use crate::{debug, error, info, print, println, warn};

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ring_buffer_wraps() {
		let mut ring = RingBuffer::new();
		ring.push(b"hello");
		let mut out = [0u8; 5];
		assert_eq!(ring.read_into(&mut out), 5);
		assert_eq!(&out, b"hello");
	}

	#[test]
	fn ring_buffer_keeps_only_the_tail_once_full() {
		let mut ring = RingBuffer::new();
		let filler = [b'x'; LOG_SIZE];
		ring.push(&filler);
		ring.push(b"tail");
		let mut out = [0u8; LOG_SIZE];
		assert_eq!(ring.read_into(&mut out), LOG_SIZE);
		assert_eq!(&out[LOG_SIZE - 4..], b"tail");
	}
}
