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

//! Kernel panic handling.
//!
//! A panic means an error the kernel has no recovery path for. There is no unwinding
//! (`panic = "abort"`): every panic runs straight into [`panic_impl`], which prints what it can
//! and halts the current CPU. A multi-core system loses only the CPU that panicked; the others
//! keep running, since nothing here attempts to stop them.

use crate::{
	arch::x86::{cpuid, halt_forever, idt::IntFrame},
	println,
};
use core::panic::{Location, PanicInfo};

fn panic_impl(msg: &dyn core::fmt::Display, loc: Option<&Location>, frame: Option<&IntFrame>) -> ! {
	crate::arch::x86::cli();
	crate::log::set_silent(false);
	println!("-- KERNEL PANIC --");
	let cpu = cpuid::local_apic_id();
	match loc {
		Some(loc) => println!("CPU {cpu}: {msg} at {loc}"),
		None => println!("CPU {cpu}: {msg}"),
	}
	if let Some(frame) = frame {
		println!("{frame}");
		let cr2 = frame.fault_address();
		let cr3 = crate::arch::x86::read_cr3();
		println!("cr2={cr2:#010x} cr3={cr3:#010x}");
	}
	println!("-- end trace --");
	#[cfg(config_debug_qemu)]
	crate::device::qemu::exit(crate::device::qemu::FAILURE);
	halt_forever();
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
	panic_impl(&info.message(), info.location(), None);
}

/// Exception names, indexed by vector 0-31. Used to describe an unhandled CPU exception in a
/// panic without keeping a full description table in [`crate::arch::x86::idt`].
static INT_REASONS: [&str; 32] = [
	"Divide-by-zero Error",
	"Debug",
	"Non-maskable Interrupt",
	"Breakpoint",
	"Overflow",
	"Bound Range Exceeded",
	"Invalid Opcode",
	"Device Not Available",
	"Double Fault",
	"Coprocessor Segment Overrun",
	"Invalid TSS",
	"Segment Not Present",
	"Stack-Segment Fault",
	"General Protection Fault",
	"Page Fault",
	"Reserved",
	"x87 Floating-Point Exception",
	"Alignment Check",
	"Machine Check",
	"SIMD Floating-Point Exception",
	"Virtualization Exception",
	"Reserved",
	"Reserved",
	"Reserved",
	"Reserved",
	"Reserved",
	"Reserved",
	"Reserved",
	"Reserved",
	"Reserved",
	"Security Exception",
	"Reserved",
];

/// Panics with the description of an unhandled CPU exception, printing the trap frame it arrived
/// with. Called from an interrupt context, where unwinding back into normal control flow isn't an
/// option regardless of `panic = "abort"`.
pub fn with_frame(frame: &IntFrame) -> ! {
	let reason = INT_REASONS
		.get(frame.vector as usize)
		.copied()
		.unwrap_or("Unknown");
	panic_impl(&reason, None, Some(frame));
}

#[lang = "eh_personality"]
fn eh_personality() {}
