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

//! The local APIC and I/O APIC: the modern replacement for the 8259 PIC pair, and the only way
//! to bring up secondary CPUs (INIT/SIPI) or route interrupts to a specific core.
//!
//! Both sit at well-known physical addresses on every machine this core targets; there is no
//! ACPI/MADT table walk here; the two fixed addresses below are what every PC since the P6 has
//! used.

use super::idt::InterruptController;
use crate::memory::{
	MMIO_WINDOW_BASE, PAGE_SIZE, PhysAddr, VirtAddr,
	vmem::{PageDirectory, flags},
};
use core::hint;

/// Default physical base of the local APIC's MMIO registers.
const LAPIC_PHYS: usize = 0xfee0_0000;
/// Default physical base of the I/O APIC's MMIO registers.
const IOAPIC_PHYS: usize = 0xfec0_0000;

const REG_ID: usize = 0x20;
const REG_EOI: usize = 0xb0;
const REG_SPURIOUS: usize = 0xf0;
const REG_ICR_LOW: usize = 0x300;
const REG_ICR_HIGH: usize = 0x310;
const REG_LVT_TIMER: usize = 0x320;
const REG_TIMER_INIT_COUNT: usize = 0x380;
const REG_TIMER_DIVIDE: usize = 0x3e0;

const IOAPIC_IOREGSEL: usize = 0x00;
const IOAPIC_IOWIN: usize = 0x10;
const IOAPIC_REDIRECTION_BASE: u32 = 0x10;
/// The I/O APIC always exposes at least this many redirection entries on the hardware this core
/// targets.
const IOAPIC_REDIRECTIONS: u32 = 24;

/// This controller routes IRQs 0-23 to vectors 0x20-0x37.
pub const VECTOR_BASE: u8 = 0x20;

/// The local APIC plus I/O APIC pair, mapped into the fixed MMIO window.
pub struct Apic {
	lapic: VirtAddr,
	ioapic: VirtAddr,
}

impl Apic {
	/// Maps both MMIO regions into `kernel_dir` at [`MMIO_WINDOW_BASE`] and returns a handle to
	/// them. Must run once, before [`InterruptController::init`] is called on the result.
	pub fn map(kernel_dir: &PageDirectory) -> Self {
		let lapic = VirtAddr(MMIO_WINDOW_BASE);
		let ioapic = VirtAddr(MMIO_WINDOW_BASE + PAGE_SIZE);
		let mmio_flags = flags::WRITE | flags::CACHE_DISABLE | flags::WRITE_THROUGH | flags::GLOBAL;
		kernel_dir
			.map(lapic, PhysAddr(LAPIC_PHYS), mmio_flags)
			.expect("failed to map local APIC registers");
		kernel_dir
			.map(ioapic, PhysAddr(IOAPIC_PHYS), mmio_flags)
			.expect("failed to map I/O APIC registers");
		Self {
			lapic,
			ioapic,
		}
	}

	fn read(&self, reg: usize) -> u32 {
		unsafe { self.lapic.as_ptr::<u32>().byte_add(reg).read_volatile() }
	}

	fn write(&self, reg: usize, value: u32) {
		unsafe { self.lapic.as_ptr::<u32>().byte_add(reg).write_volatile(value) }
	}

	fn ioapic_read(&self, reg: u32) -> u32 {
		unsafe {
			self.ioapic.as_ptr::<u32>().byte_add(IOAPIC_IOREGSEL).write_volatile(reg);
			self.ioapic.as_ptr::<u32>().byte_add(IOAPIC_IOWIN).read_volatile()
		}
	}

	fn ioapic_write(&self, reg: u32, value: u32) {
		unsafe {
			self.ioapic.as_ptr::<u32>().byte_add(IOAPIC_IOREGSEL).write_volatile(reg);
			self.ioapic.as_ptr::<u32>().byte_add(IOAPIC_IOWIN).write_volatile(value);
		}
	}

	/// Returns this CPU's local APIC id, used as the per-CPU array index everywhere else in
	/// [`super`].
	pub fn id(&self) -> u8 {
		(self.read(REG_ID) >> 24) as u8
	}

	fn wait_delivery(&self) {
		while self.read(REG_ICR_LOW) & (1 << 12) != 0 {
			hint::spin_loop();
		}
	}

	/// Sends an INIT IPI to the local APIC with id `target`.
	pub fn send_init(&self, target: u8) {
		self.write(REG_ICR_HIGH, (target as u32) << 24);
		self.write(REG_ICR_LOW, 0x4500);
		self.wait_delivery();
	}

	/// Sends a startup IPI (SIPI) to `target`, vectoring to `phys >> 12` — the AP's real-mode
	/// trampoline must live at a page-aligned address below 1 MiB.
	pub fn send_sipi(&self, phys: u32, target: u8) {
		let vector = ((phys >> 12) & 0xff) as u32;
		self.write(REG_ICR_HIGH, (target as u32) << 24);
		self.write(REG_ICR_LOW, 0x4600 | vector);
		self.wait_delivery();
	}
}

impl InterruptController for Apic {
	fn init(&self) {
		// Software-enable the APIC and set the spurious vector; bit 8 is the enable bit.
		let val = self.read(REG_SPURIOUS);
		self.write(REG_SPURIOUS, val | 0x100 | 0xff);
		// Route every I/O APIC line to this CPU, unmasked, level-triggered, fixed delivery, at
		// vectors VECTOR_BASE..VECTOR_BASE+24.
		let bsp = self.id();
		for irq in 0..IOAPIC_REDIRECTIONS as u8 {
			let vector = VECTOR_BASE + irq;
			let low = vector as u32 | (1 << 15); // level-triggered, fixed delivery, unmasked
			let high = (bsp as u32) << 24;
			let reg = IOAPIC_REDIRECTION_BASE + irq as u32 * 2;
			self.ioapic_write(reg, low);
			self.ioapic_write(reg + 1, high);
		}
	}

	fn send_eoi(&self, _vector: u8) {
		self.write(REG_EOI, 0);
	}

	fn enable_irq(&self, irq: u8) {
		let reg = IOAPIC_REDIRECTION_BASE + irq as u32 * 2;
		let low = self.ioapic_read(reg) & !(1 << 16);
		self.ioapic_write(reg, low);
	}

	fn disable_irq(&self, irq: u8) {
		let reg = IOAPIC_REDIRECTION_BASE + irq as u32 * 2;
		let low = self.ioapic_read(reg) | (1 << 16);
		self.ioapic_write(reg, low);
	}

	fn map_vector(&self, irq: u8) -> u8 {
		VECTOR_BASE + irq
	}

	fn init_timer(&self, hz: u32) {
		// IRQ0 is the timer line under both controller variants.
		self.write(REG_LVT_TIMER, (VECTOR_BASE as u32) | (1 << 17)); // periodic
		self.write(REG_TIMER_DIVIDE, 0b1011); // divide by 1
		self.set_timer_frequency(hz);
	}

	fn set_timer_frequency(&self, hz: u32) {
		// Without a calibrated bus frequency this uses a fixed count tuned for a 1 GHz APIC bus
		// clock; real hardware requires calibrating against the PIT or TSC first.
		const ASSUMED_BUS_HZ: u32 = 1_000_000_000;
		let count = ASSUMED_BUS_HZ / hz.max(1);
		self.write(REG_TIMER_INIT_COUNT, count);
	}
}
