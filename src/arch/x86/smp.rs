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

//! Bringing up application processors: INIT-SIPI-SIPI over the local APIC, and the ready counter
//! the BSP waits on.
//!
//! The real-mode trampoline that each AP runs between SIPI and [`ap_entry`] is out of scope here
//! (it's a few dozen bytes of 16-bit assembly placed at a fixed physical address by the boot
//! stub, per the external-interfaces section of the design notes); this module only drives the
//! APIC side of the handshake and the handoff into Rust.

use super::{apic::Apic, cpuid, gdt, idt, tss};
use core::{
	hint,
	sync::atomic::{AtomicUsize, Ordering},
};

/// Number of APs that have completed [`ap_entry`] and are idling.
static READY_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Returns how many APs have finished bringup so far.
pub fn ready_count() -> usize {
	READY_COUNT.load(Ordering::Acquire)
}

/// A crude busy-wait, calibrated to roughly the hundred-microsecond and ten-millisecond delays
/// the INIT-SIPI-SIPI sequence requires between steps. This core has no calibrated timer this
/// early in boot, so it spins a fixed iteration count instead.
fn busy_wait(spins: u32) {
	for _ in 0..spins {
		hint::spin_loop();
	}
}

/// Brings up every AP in `target_ids` (local APIC ids, excluding the BSP's own) and waits until
/// each has incremented the ready counter.
///
/// `trampoline_phys` is the physical address of the 16-bit real-mode entry point the boot stub
/// installed at a fixed, page-aligned location below 1 MiB.
pub fn bring_up_aps(apic: &Apic, trampoline_phys: u32, target_ids: &[u8]) {
	for &target in target_ids {
		apic.send_init(target);
		busy_wait(100_000);
		apic.send_sipi(trampoline_phys, target);
		busy_wait(20_000);
		apic.send_sipi(trampoline_phys, target);
		busy_wait(20_000);
	}
	while ready_count() < target_ids.len() {
		hint::spin_loop();
	}
}

/// The entry point every AP jumps to (via the real-mode trampoline and a short protected-mode
/// stub) once it has loaded a temporary GDT and enabled protected mode.
///
/// Per the boot sequence: initialize this core's local APIC, load its GDT/IDT/TSS slot, load the
/// shared kernel page directory, install its idle task as current, increment the ready counter,
/// enable interrupts, then idle forever.
///
/// # Safety
/// Must only be reached once per AP, immediately after the real-mode trampoline hands off to
/// protected mode on that core.
#[no_mangle]
pub unsafe extern "C" fn ap_entry() -> ! {
	let cpu_id = cpuid::local_apic_id() as usize;
	unsafe {
		gdt::init(cpu_id);
		tss::init(cpu_id);
	}
	idt::load_idtr();
	crate::process::scheduler::ap_start(cpu_id);
	READY_COUNT.fetch_add(1, Ordering::Release);
	super::sti();
	loop {
		super::hlt();
	}
}
