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

//! The Interrupt Descriptor Table and the dispatcher every vector funnels through.
//!
//! Each gate in the table points at a small assembly stub (an external collaborator, linked in
//! separately from the rest of this crate) that pushes a uniform [`IntFrame`] and calls
//! [`dispatch`]. Dispatch looks the vector up in a 256-entry handler table, asks the active
//! [`InterruptController`] for EOI, then lets the scheduler pick what runs next.

use super::{gdt, pic::Pic8259};
use crate::syscall::dispatch_syscall;
use core::{
	arch::asm,
	ffi::c_void,
	ptr::addr_of,
	sync::atomic::{AtomicU32, Ordering},
};

/// The vector system calls enter through.
pub const SYSCALL_VECTOR: usize = 0x80;
/// Number of gates in the table.
pub const ENTRIES_COUNT: usize = 256;

/// The register snapshot pushed by the assembly trap stub, shared with [`crate::process::regs`]'s
/// field layout so the dispatcher can hand it straight to the scheduler.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct IntFrame {
	pub edi: u32,
	pub esi: u32,
	pub ebp: u32,
	pub ebx: u32,
	pub edx: u32,
	pub ecx: u32,
	pub eax: u32,

	pub gs: u32,
	pub fs: u32,
	pub es: u32,
	pub ds: u32,

	/// Vector number, pushed by the stub before the common entry.
	pub vector: u32,
	/// Hardware error code, or 0 for vectors that don't push one.
	pub code: u32,

	pub eip: u32,
	pub cs: u32,
	pub eflags: u32,
	pub esp: u32,
	pub ss: u32,
}

impl IntFrame {
	/// Reads `CR2`, valid only when `vector == 14` (page fault).
	pub fn fault_address(&self) -> u32 {
		let cr2: u32;
		unsafe {
			asm!("mov {0}, cr2", out(reg) cr2, options(nomem, nostack));
		}
		cr2
	}
}

impl core::fmt::Display for IntFrame {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		writeln!(
			f,
			"eax={:#010x} ebx={:#010x} ecx={:#010x} edx={:#010x}",
			self.eax, self.ebx, self.ecx, self.edx
		)?;
		writeln!(
			f,
			"esi={:#010x} edi={:#010x} ebp={:#010x} esp={:#010x}",
			self.esi, self.edi, self.ebp, self.esp
		)?;
		writeln!(
			f,
			"eip={:#010x} cs={:#06x} eflags={:#010x} ss={:#06x}",
			self.eip, self.cs, self.eflags, self.ss
		)?;
		write!(
			f,
			"vector={:#04x} code={:#010x} ds={:#06x} es={:#06x} fs={:#06x} gs={:#06x}",
			self.vector, self.code, self.ds, self.es, self.fs, self.gs
		)
	}
}

/// The capability set an interrupt controller must provide. Two closed implementations exist in
/// this core ([`Pic8259`] and [`super::apic::Apic`]); dispatch goes through the [`Controller`] sum
/// type rather than a trait object so the hot EOI path inlines.
pub trait InterruptController {
	/// Brings the controller to a working state; masks everything until `enable_irq` is called.
	fn init(&self);
	/// Acknowledges the interrupt at `vector`.
	fn send_eoi(&self, vector: u8);
	/// Unmasks IRQ line `irq`.
	fn enable_irq(&self, irq: u8);
	/// Masks IRQ line `irq`.
	fn disable_irq(&self, irq: u8);
	/// Returns the IDT vector IRQ line `irq` is routed to.
	fn map_vector(&self, irq: u8) -> u8;
	/// Programs the timer to fire at approximately `hz` and routes it to the timer vector.
	fn init_timer(&self, hz: u32);
	/// Reprograms an already-initialized timer's frequency.
	fn set_timer_frequency(&self, hz: u32);
}

/// A sum type over the two controller variants this core supports, per the closed-set redesign
/// note: prefer a sum type over a trait object when every variant is known in-tree.
pub enum Controller {
	Pic(Pic8259),
	Apic(super::apic::Apic),
}

impl InterruptController for Controller {
	fn init(&self) {
		match self {
			Self::Pic(c) => c.init(),
			Self::Apic(c) => c.init(),
		}
	}

	fn send_eoi(&self, vector: u8) {
		match self {
			Self::Pic(c) => c.send_eoi(vector),
			Self::Apic(c) => c.send_eoi(vector),
		}
	}

	fn enable_irq(&self, irq: u8) {
		match self {
			Self::Pic(c) => c.enable_irq(irq),
			Self::Apic(c) => c.enable_irq(irq),
		}
	}

	fn disable_irq(&self, irq: u8) {
		match self {
			Self::Pic(c) => c.disable_irq(irq),
			Self::Apic(c) => c.disable_irq(irq),
		}
	}

	fn map_vector(&self, irq: u8) -> u8 {
		match self {
			Self::Pic(c) => c.map_vector(irq),
			Self::Apic(c) => c.map_vector(irq),
		}
	}

	fn init_timer(&self, hz: u32) {
		match self {
			Self::Pic(c) => c.init_timer(hz),
			Self::Apic(c) => c.init_timer(hz),
		}
	}

	fn set_timer_frequency(&self, hz: u32) {
		match self {
			Self::Pic(c) => c.set_timer_frequency(hz),
			Self::Apic(c) => c.set_timer_frequency(hz),
		}
	}
}

/// The controller this core ended up booting with. Set once in [`init`], read from every
/// interrupt return.
static mut CONTROLLER: Option<Controller> = None;

fn controller() -> &'static Controller {
	unsafe { CONTROLLER.as_ref().expect("interrupt controller not initialized") }
}

/// A registered handler: given the vector and the trap frame, does its work and may mutate the
/// frame (e.g. a syscall writing its return value into `eax`).
pub type Handler = fn(&mut IntFrame);

static HANDLERS: [AtomicHandlerSlot; ENTRIES_COUNT] = {
	const INIT: AtomicHandlerSlot = AtomicHandlerSlot::empty();
	[INIT; ENTRIES_COUNT]
};

/// A handler slot storing an optional function pointer as a `usize`, since `Option<fn(..)>`
/// isn't directly atomic-friendly across this array's const initializer.
struct AtomicHandlerSlot(core::sync::atomic::AtomicUsize);

impl AtomicHandlerSlot {
	const fn empty() -> Self {
		Self(core::sync::atomic::AtomicUsize::new(0))
	}

	fn get(&self) -> Option<Handler> {
		let raw = self.0.load(Ordering::Acquire);
		if raw == 0 {
			None
		} else {
			// SAFETY: the only non-zero values ever stored came from `set`, which stored a valid
			// `Handler`.
			Some(unsafe { core::mem::transmute::<usize, Handler>(raw) })
		}
	}

	fn set(&self, handler: Handler) {
		self.0.store(handler as usize, Ordering::Release);
	}
}

/// Registers `handler` for `vector`, overwriting any previous registration.
pub fn register(vector: u8, handler: Handler) {
	HANDLERS[vector as usize].set(handler);
}

/// Counts unhandled vectors per-source for the rate-limited warning (one message per tick-window
/// per vector).
static WARNED: [AtomicU32; ENTRIES_COUNT] = {
	const INIT: AtomicU32 = AtomicU32::new(0);
	[INIT; ENTRIES_COUNT]
};

/// The common dispatcher every trap stub calls after pushing `frame`.
///
/// 1. Save `frame` into the task that was current on entry.
/// 2. Look up and call the vector's handler, or rate-limit a warning if none is registered. A
///    handler (typically the timer tick) may call into the scheduler and change which task is
///    current.
/// 3. Ask the controller for EOI.
/// 4. Overwrite `frame` with whatever task is current now, so the stub's `iret` resumes it rather
///    than the task that took the interrupt.
/// 5. Point the TSS's `esp0` (and CR3, via `frame.cr3`) at that same task, so the next privilege
///    transition lands on the right kernel stack.
#[no_mangle]
pub extern "C" fn dispatch(frame: &mut IntFrame) {
	crate::process::scheduler::save_current_frame(frame);
	let vector = frame.vector as u8;
	match vector as usize {
		SYSCALL_VECTOR => dispatch_syscall(frame),
		0x00..=0x1f => {
			if let Some(handler) = HANDLERS[vector as usize].get() {
				handler(frame);
			} else {
				warn_once(vector);
			}
		}
		_ => {
			if let Some(handler) = HANDLERS[vector as usize].get() {
				handler(frame);
			} else {
				warn_once(vector);
			}
			controller().send_eoi(vector);
		}
	}
	crate::process::scheduler::restore_current_frame(frame);
	crate::process::scheduler::update_tss_for_current();
}

fn warn_once(vector: u8) {
	let prev = WARNED[vector as usize].fetch_add(1, Ordering::Relaxed);
	if prev == 0 {
		crate::log::warn!("unhandled interrupt vector {vector:#x}");
	}
}

/// An IDT descriptor, as `lidt` expects it.
#[repr(C, packed)]
struct IdtDesc {
	size: u16,
	addr: u32,
}

/// One gate: a 32-bit interrupt gate in ring 0, present.
#[repr(C)]
#[derive(Clone, Copy)]
struct Gate {
	offset_low: u16,
	selector: u16,
	zero: u8,
	flags: u8,
	offset_high: u16,
}

impl Gate {
	const fn missing() -> Self {
		Self {
			offset_low: 0,
			selector: 0,
			zero: 0,
			flags: 0,
			offset_high: 0,
		}
	}

	fn new(handler: *const c_void, selector: u16, flags: u8) -> Self {
		let addr = handler as usize;
		Self {
			offset_low: (addr & 0xffff) as u16,
			selector,
			zero: 0,
			flags,
			offset_high: ((addr >> 16) & 0xffff) as u16,
		}
	}
}

/// Present, ring-0, 32-bit interrupt gate.
const GATE_FLAGS: u8 = 0x8e;

static mut IDT: [Gate; ENTRIES_COUNT] = [Gate::missing(); ENTRIES_COUNT];

/// Declares the external trap stubs and builds the const list of `(vector, stub)` pairs used to
/// populate the IDT. The stubs themselves are assembly, linked in separately (see the design
/// notes on external collaborators) — each pushes its vector number (and, for the eight
/// exceptions that don't, a dummy error code) then jumps to the common entry that calls
/// [`dispatch`].
macro_rules! stub_table {
	($($vector:literal => $name:ident),+ $(,)?) => {{
		extern "C" {
			$(fn $name();)+
		}
		[$(($vector as usize, $name as usize as *const c_void)),+]
	}};
}

/// Initializes the IDT for the boot CPU. Subsequent APs only need [`load_idtr`]: the table
/// itself is shared since every gate points at the same handler stubs.
pub fn init() {
	let stubs = stub_table! {
		0x00 => isr0, 0x01 => isr1, 0x02 => isr2, 0x03 => isr3,
		0x04 => isr4, 0x05 => isr5, 0x06 => isr6, 0x07 => isr7,
		0x08 => isr8, 0x09 => isr9, 0x0a => isr10, 0x0b => isr11,
		0x0c => isr12, 0x0d => isr13, 0x0e => isr14, 0x0f => isr15,
		0x10 => isr16, 0x11 => isr17, 0x12 => isr18, 0x13 => isr19,
		0x14 => isr20, 0x15 => isr21, 0x16 => isr22, 0x17 => isr23,
		0x18 => isr24, 0x19 => isr25, 0x1a => isr26, 0x1b => isr27,
		0x1c => isr28, 0x1d => isr29, 0x1e => isr30, 0x1f => isr31,
		0x20 => irq0, 0x21 => irq1, 0x22 => irq2, 0x23 => irq3,
		0x24 => irq4, 0x25 => irq5, 0x26 => irq6, 0x27 => irq7,
		0x28 => irq8, 0x29 => irq9, 0x2a => irq10, 0x2b => irq11,
		0x2c => irq12, 0x2d => irq13, 0x2e => irq14, 0x2f => irq15,
		0x30 => irq16, 0x31 => irq17, 0x32 => irq18, 0x33 => irq19,
		0x34 => irq20, 0x35 => irq21, 0x36 => irq22, 0x37 => irq23,
		0x80 => isr_syscall,
	};
	unsafe {
		for (vector, stub) in stubs {
			IDT[vector] = Gate::new(stub, gdt::KERNEL_CS as u16, GATE_FLAGS);
		}
	}
	load_idtr();
}

/// Loads `lidt` with the (already-populated) shared IDT. Safe to call from every CPU.
pub fn load_idtr() {
	let hdr = IdtDesc {
		size: (size_of::<[Gate; ENTRIES_COUNT]>() - 1) as u16,
		addr: unsafe { addr_of!(IDT) as u32 },
	};
	unsafe {
		asm!("lidt [{0}]", in(reg) &hdr, options(readonly, nostack));
	}
}

/// Installs `controller` as the interrupt controller used for EOI/IRQ masking from here on, and
/// brings it to a working state.
pub fn set_controller(controller: Controller) {
	controller.init();
	unsafe {
		CONTROLLER = Some(controller);
	}
}

/// Enables IRQ `irq` on the active controller, routed to its mapped vector.
pub fn enable_irq(irq: u8) {
	controller().enable_irq(irq);
}

/// Disables IRQ `irq` on the active controller.
pub fn disable_irq(irq: u8) {
	controller().disable_irq(irq);
}

/// Starts the timer at approximately `hz` ticks per second on the active controller.
pub fn init_timer(hz: u32) {
	controller().init_timer(hz);
}
