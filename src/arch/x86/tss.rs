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

//! The Task State Segment: deprecated as a hardware task-switch mechanism, but still required to
//! hold `ESP0`/`SS0` — the ring-0 stack the CPU loads on a privilege-level-raising interrupt.
//!
//! One TSS per CPU, indexed the same way as [`super::gdt`]'s per-CPU array.

use super::gdt;
use core::cell::UnsafeCell;

/// The 104-byte hardware TSS. Only `esp0`/`ss0` and `iomap_base` are meaningful here: this core
/// switches tasks in software, never via a hardware task gate.
#[repr(C, packed)]
struct Tss {
	prev_tss: u32,
	esp0: u32,
	ss0: u32,
	esp1: u32,
	ss1: u32,
	esp2: u32,
	ss2: u32,
	cr3: u32,
	eip: u32,
	eflags: u32,
	eax: u32,
	ecx: u32,
	edx: u32,
	ebx: u32,
	esp: u32,
	ebp: u32,
	esi: u32,
	edi: u32,
	es: u32,
	cs: u32,
	ss: u32,
	ds: u32,
	fs: u32,
	gs: u32,
	ldt: u32,
	trap: u16,
	iomap_base: u16,
}

impl Tss {
	const fn zeroed() -> Self {
		Self {
			prev_tss: 0,
			esp0: 0,
			ss0: 0,
			esp1: 0,
			ss1: 0,
			esp2: 0,
			ss2: 0,
			cr3: 0,
			eip: 0,
			eflags: 0,
			eax: 0,
			ecx: 0,
			edx: 0,
			ebx: 0,
			esp: 0,
			ebp: 0,
			esi: 0,
			edi: 0,
			es: 0,
			cs: 0,
			ss: 0,
			ds: 0,
			fs: 0,
			gs: 0,
			ldt: 0,
			trap: 0,
			iomap_base: 0,
		}
	}
}

/// Aligned so the TSS never straddles a page boundary the I/O permission bitmap might otherwise
/// reference.
#[repr(align(16))]
struct TssCell(UnsafeCell<Tss>);

unsafe impl Sync for TssCell {}

static TSSES: [TssCell; gdt::MAX_CPUS] = {
	const INIT: TssCell = TssCell(UnsafeCell::new(Tss::zeroed()));
	[INIT; gdt::MAX_CPUS]
};

/// Registers this CPU's TSS descriptor in its GDT and loads it into the task register.
///
/// # Safety
/// Must run once per CPU, after [`gdt::init`] for that same `cpu_id`.
pub unsafe fn init(cpu_id: usize) {
	let tss = TSSES[cpu_id].0.get();
	unsafe {
		tss.write(Tss::zeroed());
		(*tss).ss0 = gdt::KERNEL_DS as u32;
	}
	gdt::current(cpu_id).set_tss(tss as u32, (size_of::<Tss>() - 1) as u32);
	gdt::load_tr();
}

/// Updates the ring-0 stack pointer the CPU will load on the next privilege-raising interrupt.
/// Called by the scheduler every time it switches to a different task.
pub fn set_esp0(cpu_id: usize, esp0: u32) {
	unsafe {
		(*TSSES[cpu_id].0.get()).esp0 = esp0;
	}
}
