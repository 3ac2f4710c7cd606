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

//! Nucleus is a small 32-bit x86 SMP kernel.

#![no_std]
#![no_main]
#![feature(alloc_error_handler)]
#![feature(lang_items)]

extern crate alloc;

pub mod arch;
pub mod device;
pub mod file;
pub mod log;
pub mod memory;
pub mod multiboot;
pub mod panic;
pub mod process;
pub mod sync;
pub mod syscall;
pub use utils;

use crate::{
	arch::x86::{
		apic::Apic,
		cpuid,
		idt::{self, Controller, IntFrame},
		smp, tss,
	},
	device::console::Console,
	file::{memfs::MemFs, vfs},
	memory::{
		PhysAddr, VirtAddr,
		fault::{self, FaultOutcome},
		vmem::PageDirectory,
	},
	process::{Context, Task, scheduler},
};
use core::ffi::c_void;
use utils::ptr::arc::{Arc, try_new};

/// The kernel's name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
/// Current kernel version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// The boot stub (out of scope here; see the design notes' external-interfaces section) leaves
// the CPU in protected mode with a stack already set up and this symbol pointing just past it.
extern "C" {
	static boot_stack_top: u8;
}

/// Classifies a Multiboot memory-map region by its base address. A region is assumed to lie
/// entirely in one zone, which holds for every machine this core has been run on; a region
/// straddling a zone boundary would need splitting, which this core does not attempt.
fn zone_of(base: PhysAddr) -> memory::Zone {
	const DMA_LIMIT: usize = 16 * 1024 * 1024;
	if base.0 < DMA_LIMIT {
		memory::Zone::Dma
	} else if base.0 < memory::DIRECT_MAP_SIZE {
		memory::Zone::Normal
	} else {
		memory::Zone::High
	}
}

/// Registered for every unhandled page fault (vector 14): decodes the faulting address and error
/// code, and either retries the instruction (the fault was resolved, e.g. a demand-filled page)
/// or escalates to a kernel panic.
fn handle_page_fault(frame: &mut IntFrame) {
	let addr = VirtAddr(frame.fault_address() as usize);
	let error = fault::FaultError::from_code(frame.code);
	if fault::handle(addr, error) == FaultOutcome::Fatal {
		panic::with_frame(frame);
	}
}

/// Registered for every CPU exception this core does not otherwise handle (everything in 0..32
/// except the page fault and the syscall vector): there is no recovery path, so this is fatal.
fn handle_fatal_exception(frame: &mut IntFrame) {
	panic::with_frame(frame);
}

/// Parses a `smp=1,2,3` style option out of the kernel command line, naming the local APIC ids of
/// the application processors to bring up. There is no ACPI/MADT table walk here (out of scope;
/// see the design notes), so without this option the kernel stays single-core.
fn parse_smp_ids(cmdline: &str) -> alloc::vec::Vec<u8> {
	let mut ids = alloc::vec::Vec::new();
	for opt in cmdline.split_whitespace() {
		let Some(list) = opt.strip_prefix("smp=") else {
			continue;
		};
		for id in list.split(',') {
			if let Ok(id) = id.parse::<u8>() {
				ids.push(id);
			}
		}
	}
	ids
}

/// Everything after the boot stub hands off, up to the point where this core idles and waits for
/// its first timer tick. Split out of [`kernel_main`] so every local here is dropped before
/// falling into the idle loop.
fn kernel_main_inner(magic: u32, multiboot_ptr: *const c_void) {
	let console = try_new(Console::init()).expect("failed to allocate the console");
	log::set_sink(Arc::leak(console.clone()));
	log::info!("{NAME} {VERSION} booting");

	let boot_info = unsafe { multiboot::read(magic, multiboot_ptr) };
	for &(base, pages) in &boot_info.regions[..boot_info.region_count] {
		unsafe {
			memory::buddy::init_zone(zone_of(base), base, pages);
		}
	}

	// The boot stub already built the directory that's active right now: the direct map and the
	// kernel image are mapped there. Adopt it rather than building a second one.
	let kernel_dir = PageDirectory::current();
	process::set_kernel_directory(kernel_dir);
	scheduler::set_kernel_directory(&kernel_dir);

	unsafe {
		arch::x86::gdt::init(0);
		tss::init(0);
	}
	idt::init();
	idt::register(14, handle_page_fault);
	for vector in 0..32u8 {
		if vector != 14 {
			idt::register(vector, handle_fatal_exception);
		}
	}
	idt::register(0x20, scheduler::on_tick);

	let has_apic = cpuid::has_apic();
	if has_apic {
		idt::set_controller(Controller::Apic(Apic::map(&kernel_dir)));
	} else {
		idt::set_controller(Controller::Pic(arch::x86::pic::Pic8259));
	}
	idt::init_timer(scheduler::TICK_HZ);

	let context = try_new(Context::new(&kernel_dir, console.clone()).expect("failed to build the initial context"))
		.expect("failed to allocate the initial context");
	let stack_top = unsafe { &boot_stack_top as *const u8 as u32 };
	let regs = process::regs::Registers::kernel(0, stack_top, kernel_dir.phys_addr().0 as u32);
	// `stack_top` is the linker-reserved boot stack, not a buddy-allocated frame run, so the idle
	// task must not try to free it: `kernel_stack_order` stays `None`.
	let idle =
		Task::new("idle/0", context, regs, stack_top, None, 0, 0, 1).expect("failed to allocate the idle task");
	scheduler::init_cpu(0, idle);

	let memfs = try_new(MemFs::new()).expect("failed to allocate the root filesystem");
	if let Some(image) = boot_info.initramfs {
		memfs.load_initramfs(image).expect("failed to load the initramfs");
	}
	vfs::register_fs("/", memfs).expect("failed to mount the root filesystem");

	if has_apic {
		let targets = parse_smp_ids(boot_info.cmdline.unwrap_or(""));
		if !targets.is_empty() {
			log::info!("bringing up {} application processor(s)", targets.len());
			// The real-mode trampoline's physical address: fixed and reserved by the boot stub,
			// out of scope here (see the design notes' external-interfaces section).
			const TRAMPOLINE_PHYS: u32 = 0x8000;
			let apic = Apic::map(&kernel_dir);
			smp::bring_up_aps(&apic, TRAMPOLINE_PHYS, &targets);
		}
	}
}

/// The entry point the boot stub jumps to once it has loaded a GDT, switched to protected mode,
/// and built the kernel's initial page directory (see the out-of-scope note on the real-mode
/// handoff in the design notes).
///
/// `magic` and `multiboot_ptr` are exactly what Multiboot2 leaves in EAX/EBX.
#[no_mangle]
pub extern "C" fn kernel_main(magic: u32, multiboot_ptr: *const c_void) -> ! {
	kernel_main_inner(magic, multiboot_ptr);
	arch::x86::sti();
	loop {
		arch::x86::hlt();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn zone_of_classifies_by_base_address() {
		assert_eq!(zone_of(PhysAddr(0)), memory::Zone::Dma);
		assert_eq!(zone_of(PhysAddr(15 * 1024 * 1024)), memory::Zone::Dma);
		assert_eq!(zone_of(PhysAddr(16 * 1024 * 1024)), memory::Zone::Normal);
		assert_eq!(zone_of(PhysAddr(memory::DIRECT_MAP_SIZE)), memory::Zone::High);
	}

	#[test]
	fn parse_smp_ids_reads_comma_list() {
		assert_eq!(parse_smp_ids("root=/dev/sda smp=1,2,3 quiet"), alloc::vec![1, 2, 3]);
	}

	#[test]
	fn parse_smp_ids_absent_is_empty() {
		assert!(parse_smp_ids("root=/dev/sda quiet").is_empty());
	}
}
