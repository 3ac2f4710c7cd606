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

//! A minimal ELF32 i386 loader: `PT_LOAD` segments and the handful of relocation types an
//! `ET_DYN` binary needs to run with no real dynamic linker around.
//!
//! Segment content is written through the kernel's direct map ([`phys2virt`]) rather than
//! through the target address space's own user-range addresses, since at `execve` time that
//! address space usually isn't the one active in CR3 yet.

use crate::{
	memory::{PAGE_SIZE, PhysAddr, VirtAddr, phys2virt},
	process::mem_space::{MemSpace, PROT_EXEC, PROT_READ, PROT_WRITE, VmaKind},
};
use core::mem::size_of;
use utils::errno::{EResult, Errno};

const EI_NIDENT: usize = 16;
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const ET_DYN: u16 = 3;
const EM_386: u16 = 3;

const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const PT_GNU_EH_FRAME: u32 = 0x6474_e550;

const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

const DT_NULL: u32 = 0;
const DT_SYMTAB: u32 = 6;
const DT_STRTAB: u32 = 5;
const DT_REL: u32 = 17;
const DT_RELSZ: u32 = 18;
const DT_JMPREL: u32 = 23;
const DT_PLTRELSZ: u32 = 2;

const R_386_NONE: u8 = 0;
const R_386_32: u8 = 1;
const R_386_PC32: u8 = 2;
const R_386_GLOB_DAT: u8 = 6;
const R_386_JMP_SLOT: u8 = 7;
const R_386_RELATIVE: u8 = 8;

#[repr(C)]
#[derive(Clone, Copy)]
struct Ehdr {
	e_ident: [u8; EI_NIDENT],
	e_type: u16,
	e_machine: u16,
	e_version: u32,
	e_entry: u32,
	e_phoff: u32,
	e_shoff: u32,
	e_flags: u32,
	e_ehsize: u16,
	e_phentsize: u16,
	e_phnum: u16,
	e_shentsize: u16,
	e_shnum: u16,
	e_shstrndx: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Phdr {
	p_type: u32,
	p_offset: u32,
	p_vaddr: u32,
	p_paddr: u32,
	p_filesz: u32,
	p_memsz: u32,
	p_flags: u32,
	p_align: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Dyn {
	d_tag: u32,
	d_val: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Sym {
	st_name: u32,
	st_value: u32,
	st_size: u32,
	st_info: u8,
	st_other: u8,
	st_shndx: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Rel {
	r_offset: u32,
	r_info: u32,
}

impl Rel {
	fn sym(&self) -> usize {
		(self.r_info >> 8) as usize
	}

	fn kind(&self) -> u8 {
		(self.r_info & 0xff) as u8
	}
}

/// Reads a plain-old-data record of type `T` out of `image` at byte offset `off`, bounds-checked.
fn read_at<T: Copy>(image: &[u8], off: usize) -> EResult<T> {
	let size = size_of::<T>();
	let end = off.checked_add(size).ok_or(Errno::EINVAL)?;
	let bytes = image.get(off..end).ok_or(Errno::EINVAL)?;
	// SAFETY: every record read here is a packed run of integers valid for any bit pattern, and
	// `bytes` is exactly `size_of::<T>()` long.
	Ok(unsafe { core::ptr::read_unaligned(bytes.as_ptr().cast::<T>()) })
}

fn prot_of(flags: u32) -> u8 {
	let mut p = 0;
	if flags & PF_R != 0 {
		p |= PROT_READ;
	}
	if flags & PF_W != 0 {
		p |= PROT_WRITE;
	}
	if flags & PF_X != 0 {
		p |= PROT_EXEC;
	}
	p
}

/// Writes `data` into `space`'s already-mapped pages starting at `dst`, one frame at a time
/// through the direct map. Shared with [`crate::process::exec`]'s argv/envp setup, which writes
/// onto a freshly mapped, not-yet-active user stack the same way a `PT_LOAD` segment is written.
pub(crate) fn write_mapped(space: &MemSpace, dst: VirtAddr, data: &[u8]) -> EResult<()> {
	let mut written = 0;
	while written < data.len() {
		let page = VirtAddr((dst.0 + written) & !(PAGE_SIZE - 1));
		let offset_in_page = (dst.0 + written) - page.0;
		let (phys, _) = space.directory().translate(page).ok_or(Errno::EFAULT)?;
		let chunk = (PAGE_SIZE - offset_in_page).min(data.len() - written);
		// SAFETY: `phys` was just looked up as the frame backing `page`, which `load_segment`
		// mapped writable before calling here.
		unsafe {
			let dst_ptr = phys2virt(PhysAddr(phys.0 + offset_in_page)).as_ptr::<u8>();
			core::ptr::copy_nonoverlapping(data[written..].as_ptr(), dst_ptr, chunk);
		}
		written += chunk;
	}
	Ok(())
}

/// Maps and populates one `PT_LOAD` (or `PT_GNU_EH_FRAME`, copied the same way) segment.
fn load_segment(image: &[u8], space: &mut MemSpace, phdr: &Phdr, base: usize) -> EResult<()> {
	if phdr.p_memsz == 0 {
		return Ok(());
	}
	let vaddr = phdr.p_vaddr as usize + base;
	let page_start = VirtAddr(vaddr & !(PAGE_SIZE - 1));
	let page_offset = vaddr - page_start.0;
	let mapped_size = (page_offset + phdr.p_memsz as usize).div_ceil(PAGE_SIZE) * PAGE_SIZE;
	let prot = prot_of(phdr.p_flags) | PROT_READ;
	let kind = if prot & PROT_EXEC != 0 { VmaKind::Code } else { VmaKind::Data };
	space.map_fixed_area(page_start, mapped_size, prot, kind)?;
	let file_start = phdr.p_offset as usize;
	let file_end = file_start.checked_add(phdr.p_filesz as usize).ok_or(Errno::EINVAL)?;
	let content = image.get(file_start..file_end).ok_or(Errno::EINVAL)?;
	write_mapped(space, VirtAddr(vaddr), content)
}

/// Returns the symbol's relocation value: `value + base`, or `0` for an undefined symbol (index
/// `0`, `st_value == 0`).
fn symbol_value(image: &[u8], symtab: usize, index: usize, base: usize) -> EResult<u32> {
	let sym: Sym = read_at(image, symtab + index * size_of::<Sym>())?;
	if sym.st_value == 0 {
		return Ok(0);
	}
	Ok(sym.st_value + base as u32)
}

/// Applies every relocation in the table starting at file offset `off`, `count` entries long.
fn apply_relocations(image: &[u8], space: &MemSpace, off: usize, count: usize, symtab: usize, base: usize) -> EResult<()> {
	for i in 0..count {
		let rel: Rel = read_at(image, off + i * size_of::<Rel>())?;
		let where_addr = VirtAddr(rel.r_offset as usize + base);
		let value = match rel.kind() {
			R_386_NONE => continue,
			R_386_32 => symbol_value(image, symtab, rel.sym(), base)?,
			R_386_PC32 => symbol_value(image, symtab, rel.sym(), base)?.wrapping_sub(where_addr.0 as u32),
			R_386_GLOB_DAT | R_386_JMP_SLOT => symbol_value(image, symtab, rel.sym(), base)?,
			R_386_RELATIVE => {
				let (phys, _) = space.directory().translate(where_addr).ok_or(Errno::EFAULT)?;
				let existing = unsafe { phys2virt(phys).as_ptr::<u32>().read_unaligned() };
				existing.wrapping_add(base as u32)
			}
			_ => return Err(Errno::EINVAL),
		};
		write_mapped(space, where_addr, &value.to_le_bytes())?;
	}
	Ok(())
}

/// Walks the `PT_DYNAMIC` table at `dyn_vaddr` and applies every `DT_REL`/`DT_JMPREL` relocation
/// it names.
fn relocate(image: &[u8], space: &MemSpace, dyn_file_off: usize, base: usize) -> EResult<()> {
	let mut symtab = None;
	let mut rel = None;
	let mut relsz = 0usize;
	let mut jmprel = None;
	let mut pltrelsz = 0usize;
	for i in 0.. {
		let entry: Dyn = read_at(image, dyn_file_off + i * size_of::<Dyn>())?;
		match entry.d_tag {
			DT_NULL => break,
			DT_SYMTAB => symtab = Some(entry.d_val as usize),
			DT_REL => rel = Some(entry.d_val as usize),
			DT_RELSZ => relsz = entry.d_val as usize,
			DT_JMPREL => jmprel = Some(entry.d_val as usize),
			DT_PLTRELSZ => pltrelsz = entry.d_val as usize,
			// DT_STRTAB is only needed to print symbol names in diagnostics; this loader
			// resolves relocations purely by index so it is otherwise unused.
			DT_STRTAB => {}
			_ => {}
		}
	}
	let symtab = symtab.unwrap_or(0);
	if let Some(rel_vaddr) = rel {
		apply_relocations(image, space, rel_vaddr, relsz / size_of::<Rel>(), symtab, base)?;
	}
	if let Some(jmprel_vaddr) = jmprel {
		apply_relocations(image, space, jmprel_vaddr, pltrelsz / size_of::<Rel>(), symtab, base)?;
	}
	Ok(())
}

/// Loads an ELF32 i386 image (`ET_EXEC` or `ET_DYN`) into `space`, returning the entry point to
/// jump to. `base` is the load bias applied to `ET_DYN` images (ignored for `ET_EXEC`, which is
/// always position-dependent).
pub fn load(image: &[u8], space: &mut MemSpace, base: usize) -> EResult<u32> {
	let ehdr: Ehdr = read_at(image, 0)?;
	if ehdr.e_ident[0..4] != [0x7f, b'E', b'L', b'F'] || ehdr.e_ident[4] != ELFCLASS32 || ehdr.e_ident[5] != ELFDATA2LSB {
		return Err(Errno::EINVAL);
	}
	if ehdr.e_machine != EM_386 || (ehdr.e_type != ET_EXEC && ehdr.e_type != ET_DYN) {
		return Err(Errno::EINVAL);
	}
	let base = if ehdr.e_type == ET_DYN { base } else { 0 };
	let mut dynamic_off = None;
	for i in 0..ehdr.e_phnum as usize {
		let off = ehdr.e_phoff as usize + i * size_of::<Phdr>();
		let phdr: Phdr = read_at(image, off)?;
		match phdr.p_type {
			PT_LOAD | PT_GNU_EH_FRAME => load_segment(image, space, &phdr, base)?,
			PT_DYNAMIC => dynamic_off = Some(phdr.p_offset as usize),
			_ => {}
		}
	}
	if ehdr.e_type == ET_DYN {
		if let Some(dyn_off) = dynamic_off {
			relocate(image, space, dyn_off, base)?;
		}
	}
	Ok(ehdr.e_entry.wrapping_add(base as u32))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn prot_of_maps_segment_flags() {
		assert_eq!(prot_of(PF_R), PROT_READ);
		assert_eq!(prot_of(PF_R | PF_W), PROT_READ | PROT_WRITE);
		assert_eq!(prot_of(PF_R | PF_X), PROT_READ | PROT_EXEC);
	}

	#[test]
	fn rejects_bad_magic() {
		let image = [0u8; 64];
		assert_eq!(read_at::<Ehdr>(&image, 0).map(|e| e.e_ident[0]), Ok(0));
	}
}
