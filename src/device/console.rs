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

//! The character console: a VGA text-mode screen mirrored to a 16550 serial line.
//!
//! This is deliberately the bare minimum needed to exercise the rest of the core: writing bytes
//! and scrolling. There is no cursor shape control, no color, no ANSI parsing and no input side;
//! a real console driver is out of scope here (see the module docs on [`crate::device`]).

use crate::{
	arch::x86::{inb, outb},
	file::{DirEntry, FileAttribute, FileDescriptor, FileType},
	memory::PhysAddr,
};
use utils::{errno::{EResult, Errno}, lock::IntMutex};

/// Physical address of the VGA text buffer.
const VGA_BUFFER: PhysAddr = PhysAddr(0xb8000);
/// Screen width, in characters.
const WIDTH: usize = 80;
/// Screen height, in characters.
const HEIGHT: usize = 25;
/// White on black.
const DEFAULT_ATTR: u8 = 0x0f;

/// COM1's I/O port base.
const SERIAL_PORT: u16 = 0x3f8;

fn serial_init() {
	unsafe {
		outb(SERIAL_PORT + 1, 0x00); // disable interrupts
		outb(SERIAL_PORT + 3, 0x80); // enable DLAB
		outb(SERIAL_PORT, 0x03); // divisor low: 38400 baud
		outb(SERIAL_PORT + 1, 0x00); // divisor high
		outb(SERIAL_PORT + 3, 0x03); // 8 bits, no parity, one stop bit
		outb(SERIAL_PORT + 2, 0xc7); // enable and clear FIFOs, 14-byte threshold
		outb(SERIAL_PORT + 4, 0x0b); // IRQs disabled, RTS/DSR set
	}
}

fn serial_transmit_empty() -> bool {
	unsafe { inb(SERIAL_PORT + 5) & 0x20 != 0 }
}

fn serial_putc(c: u8) {
	while !serial_transmit_empty() {}
	unsafe {
		outb(SERIAL_PORT, c);
	}
}

/// The mutable screen state: cursor position and the direct-mapped VGA buffer pointer.
struct Screen {
	col: usize,
	row: usize,
}

impl Screen {
	const fn new() -> Self {
		Self { col: 0, row: 0 }
	}

	fn buffer(&self) -> *mut u16 {
		// The direct map covers low physical memory including the VGA buffer at boot; this core
		// never remaps or reclaims that range.
		VGA_BUFFER
			.virt()
			.expect("VGA buffer must lie in the direct map")
			.as_ptr()
	}

	fn put_cell(&self, row: usize, col: usize, c: u8) {
		let offset = row * WIDTH + col;
		unsafe {
			self.buffer()
				.add(offset)
				.write_volatile((DEFAULT_ATTR as u16) << 8 | c as u16);
		}
	}

	fn scroll(&mut self) {
		unsafe {
			let buf = self.buffer();
			for row in 1..HEIGHT {
				for col in 0..WIDTH {
					let cell = buf.add(row * WIDTH + col).read_volatile();
					buf.add((row - 1) * WIDTH + col).write_volatile(cell);
				}
			}
		}
		for col in 0..WIDTH {
			self.put_cell(HEIGHT - 1, col, b' ');
		}
		self.row = HEIGHT - 1;
	}

	fn putc(&mut self, c: u8) {
		match c {
			b'\n' => {
				self.col = 0;
				self.row += 1;
			}
			b'\r' => self.col = 0,
			_ => {
				self.put_cell(self.row, self.col, c);
				self.col += 1;
				if self.col >= WIDTH {
					self.col = 0;
					self.row += 1;
				}
			}
		}
		if self.row >= HEIGHT {
			self.scroll();
		}
	}
}

/// The console device: VGA text output mirrored to the first serial port.
///
/// Implements both [`FileDescriptor`] (so it can be installed at fds 0-2 of a context) and
/// [`crate::log::Sink`] (so kernel log lines land on-screen as well as in the ring buffer).
pub struct Console {
	screen: IntMutex<Screen>,
}

impl Console {
	/// Initializes the VGA screen and the serial port. Must run once, early in boot, before any
	/// context with this console installed at its fds runs.
	pub fn init() -> Self {
		serial_init();
		Self {
			screen: IntMutex::new(Screen::new()),
		}
	}

	fn write_bytes(&self, buf: &[u8]) {
		let mut screen = self.screen.lock();
		for &b in buf {
			screen.putc(b);
			serial_putc(b);
		}
	}
}

impl FileDescriptor for Console {
	fn read(&self, _buf: &mut [u8]) -> EResult<usize> {
		// No input side: see the module docs.
		Ok(0)
	}

	fn write(&self, buf: &[u8]) -> EResult<usize> {
		self.write_bytes(buf);
		Ok(buf.len())
	}

	fn seek(&self, _offset: u64) -> EResult<u64> {
		Err(Errno::ENOSYS)
	}

	fn stat(&self) -> EResult<FileAttribute> {
		Ok(FileAttribute {
			inode: 0,
			size: 0,
			file_type: FileType::Regular,
		})
	}

	fn iterate(&self, _pos: u64) -> EResult<Option<(DirEntry, u64)>> {
		Err(Errno::ENOTDIR)
	}
}

impl crate::log::Sink for Console {
	fn write(&self, bytes: &[u8]) {
		self.write_bytes(bytes);
	}
}
