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

//! The Global Descriptor Table: a deprecated x86 structure that protected mode still requires in
//! order to describe segments, switch privilege rings, and load the TSS.
//!
//! Every CPU gets its own GDT, indexed by APIC id rather than kept in a single shared table, per
//! the per-CPU-array convention used throughout [`crate::arch::x86`].

use core::{arch::asm, cell::UnsafeCell};

/// The offset of the kernel code segment.
pub const KERNEL_CS: usize = 8;
/// The offset of the kernel data segment.
pub const KERNEL_DS: usize = 16;
/// The offset of the user code segment.
pub const USER_CS: usize = 24;
/// The offset of the user data segment.
pub const USER_DS: usize = 32;
/// The offset of the Task State Segment.
pub const TSS_OFFSET: usize = 40;

/// Number of entries in [`Gdt`]: null, kernel code, kernel data, user code, user data, and the
/// two entries a 32-bit TSS descriptor occupies when extended to 64 bits is not needed, so one
/// slot plus a spare for alignment.
const ENTRY_COUNT: usize = 6;

/// A single 8-byte GDT entry.
#[repr(C, align(8))]
#[derive(Clone, Copy, Default)]
pub struct Entry(pub u64);

impl Entry {
	/// Builds an entry from its packed fields.
	pub const fn new(base: u32, limit: u32, access_byte: u8, flags: u8) -> Self {
		let mut ent = Self(0);
		ent.set_base(base);
		ent.set_limit(limit);
		ent.set_access_byte(access_byte);
		ent.set_flags(flags);
		ent
	}

	pub const fn set_base(&mut self, base: u32) {
		self.0 &= !(0xffffff << 16);
		self.0 &= !(0xff << 56);
		self.0 |= (base as u64 & 0xffffff) << 16;
		self.0 |= ((base as u64 >> 24) & 0xff) << 56;
	}

	pub const fn set_limit(&mut self, limit: u32) {
		self.0 &= !0xffff;
		self.0 &= !(0xf << 48);
		self.0 |= limit as u64 & 0xffff;
		self.0 |= ((limit as u64 >> 16) & 0xf) << 48;
	}

	pub const fn set_access_byte(&mut self, byte: u8) {
		self.0 &= !(0xff << 40);
		self.0 |= (byte as u64) << 40;
	}

	pub const fn set_flags(&mut self, flags: u8) {
		self.0 &= !(0x0f << 52);
		self.0 |= ((flags as u64) & 0x0f) << 52;
	}
}

/// One CPU's GDT: null, kernel code/data, user code/data, and a TSS descriptor patched in at
/// boot once the per-CPU TSS's address is known.
pub struct Gdt(UnsafeCell<[Entry; ENTRY_COUNT]>);

// Each CPU owns and only ever touches its own `Gdt` from that CPU; `lgdt`/segment reloads never
// race another core's.
unsafe impl Sync for Gdt {}

impl Default for Gdt {
	fn default() -> Self {
		Self(UnsafeCell::new([
			// Null
			Entry(0),
			// Kernel code: base 0, limit 4 GiB, present|ring0|code|readable, 32-bit granularity
			Entry::new(0, 0xfffff, 0b1001_1010, 0b1100),
			// Kernel data
			Entry::new(0, 0xfffff, 0b1001_0010, 0b1100),
			// User code, ring 3
			Entry::new(0, 0xfffff, 0b1111_1010, 0b1100),
			// User data, ring 3
			Entry::new(0, 0xfffff, 0b1111_0010, 0b1100),
			// TSS descriptor: patched by `set_tss` once the TSS's virtual address is known.
			Entry(0),
		]))
	}
}

impl Gdt {
	/// Overwrites every entry with the standard layout. Called once per CPU at boot, before that
	/// CPU's GDT is loaded.
	fn reset(&self) {
		unsafe {
			*self.0.get() = Gdt::default().0.into_inner();
		}
	}

	/// Writes the TSS descriptor (a 32-bit available TSS, ring 0 accessible) for `base`/`limit`.
	pub fn set_tss(&self, base: u32, limit: u32) {
		let entry = Entry::new(base, limit, 0b1000_1001, 0b0000);
		unsafe {
			(*self.0.get())[TSS_OFFSET / 8] = entry;
		}
	}
}

/// Upper bound on the number of CPUs this core's per-CPU arrays (GDT, TSS, scheduler run queues)
/// provision space for.
pub const MAX_CPUS: usize = 32;

/// One GDT per possible CPU, indexed by APIC id. `Default` zero-initializes every entry to the
/// segments every core needs; only the TSS descriptor differs per core.
static GDTS: [Gdt; MAX_CPUS] = {
	const INIT: Gdt = Gdt(UnsafeCell::new([Entry(0); ENTRY_COUNT]));
	[INIT; MAX_CPUS]
};

/// A GDT descriptor, as `lgdt` expects it.
#[repr(C, packed)]
struct GdtDesc {
	size: u16,
	addr: u32,
}

/// Initializes and loads the GDT for the current CPU, then reloads every segment register.
///
/// `cpu_id` is this core's APIC id, used as the index into the per-CPU GDT array.
///
/// # Safety
/// Must run once per CPU, early in that CPU's boot, before any code relies on the kernel's
/// segment layout.
pub unsafe fn init(cpu_id: usize) {
	let gdt = &GDTS[cpu_id];
	gdt.reset();
	let hdr = GdtDesc {
		size: (size_of::<[Entry; ENTRY_COUNT]>() - 1) as u16,
		addr: gdt.0.get() as u32,
	};
	unsafe {
		asm!(
			"lgdt [{hdr}]",
			"mov ax, {kds:x}",
			"mov ds, ax",
			"mov es, ax",
			"mov fs, ax",
			"mov gs, ax",
			"mov ss, ax",
			"push {kcs}",
			"lea eax, [2f]",
			"push eax",
			"retf",
			"2:",
			hdr = in(reg) &hdr,
			kds = in(reg) KERNEL_DS as u32,
			kcs = in(reg) KERNEL_CS as u32,
			out("eax") _,
			options(nostack),
		);
	}
}

/// Returns this CPU's GDT, used to patch in the TSS descriptor once the TSS is allocated.
pub fn current(cpu_id: usize) -> &'static Gdt {
	&GDTS[cpu_id]
}

/// Loads `TSS_OFFSET` into the task register.
pub fn load_tr() {
	unsafe {
		asm!("ltr {0:x}", in(reg) TSS_OFFSET as u16, options(nostack, nomem));
	}
}
