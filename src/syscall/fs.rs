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

//! Path and descriptor system calls: `open`, `read`, `write`, `close`, `seek`, `stat`,
//! `mkdir`/`unlink`/`rmdir`, `getdents`, `chdir`, `getcwd`.

use crate::{
	file::{FileType, vfs},
	process::scheduler,
	syscall::userptr,
};
use alloc::vec::Vec;
use utils::errno::{EResult, Errno};

/// Maximum single `read`/`write` transfer size, to bound the kernel-side staging buffer.
const MAX_IO: usize = 1024 * 1024;

pub fn open(path_addr: u32) -> EResult<i32> {
	let path = userptr::copy_user_str(path_addr)?;
	let current = scheduler::current_task().ok_or(Errno::ESRCH)?;
	let file = vfs::open(path.as_str())?;
	let fd = current.context.install_fd(file)?;
	Ok(fd as i32)
}

pub fn read(fd: u32, buf_addr: u32, size: u32) -> EResult<i32> {
	let size = (size as usize).min(MAX_IO);
	let current = scheduler::current_task().ok_or(Errno::ESRCH)?;
	let file = current.context.get_fd(fd)?;
	let mut staging = Vec::new();
	staging.try_reserve_exact(size).map_err(|_| Errno::ENOMEM)?;
	staging.resize(size, 0);
	let n = file.read(&mut staging)?;
	userptr::copy_to_user(buf_addr, &staging[..n])?;
	Ok(n as i32)
}

pub fn write(fd: u32, buf_addr: u32, size: u32) -> EResult<i32> {
	let size = (size as usize).min(MAX_IO);
	let current = scheduler::current_task().ok_or(Errno::ESRCH)?;
	let file = current.context.get_fd(fd)?;
	let staging = userptr::copy_from_user(buf_addr, size)?;
	let n = file.write(&staging)?;
	Ok(n as i32)
}

pub fn close(fd: u32) -> EResult<i32> {
	let current = scheduler::current_task().ok_or(Errno::ESRCH)?;
	current.context.close_fd(fd)?;
	Ok(0)
}

pub fn seek(fd: u32, offset: u32) -> EResult<i32> {
	let current = scheduler::current_task().ok_or(Errno::ESRCH)?;
	let file = current.context.get_fd(fd)?;
	let pos = file.seek(offset as u64)?;
	Ok(pos as i32)
}

/// Layout handed back to user code by the `stat` syscall; matches [`crate::file::FileAttribute`]
/// field for field.
#[repr(C)]
struct StatBuf {
	inode: u64,
	size: u64,
	file_type: u32,
}

fn file_type_code(kind: FileType) -> u32 {
	match kind {
		FileType::Regular => 1,
		FileType::Directory => 2,
	}
}

pub fn stat(path_addr: u32, out_addr: u32) -> EResult<i32> {
	let path = userptr::copy_user_str(path_addr)?;
	let attr = vfs::stat(path.as_str())?;
	let buf = StatBuf {
		inode: attr.inode,
		size: attr.size,
		file_type: file_type_code(attr.file_type),
	};
	// SAFETY: `StatBuf` is a plain-old-data `#[repr(C)]` struct with no padding-sensitive
	// invariants; reading its bytes for a one-way copy to userspace is sound.
	let bytes = unsafe { core::slice::from_raw_parts((&buf as *const StatBuf).cast::<u8>(), core::mem::size_of::<StatBuf>()) };
	userptr::copy_to_user(out_addr, bytes)?;
	Ok(0)
}

pub fn mkdir(path_addr: u32) -> EResult<i32> {
	let path = userptr::copy_user_str(path_addr)?;
	vfs::mkdir(path.as_str())?;
	Ok(0)
}

pub fn unlink(path_addr: u32) -> EResult<i32> {
	let path = userptr::copy_user_str(path_addr)?;
	vfs::unlink(path.as_str())?;
	Ok(0)
}

pub fn rmdir(path_addr: u32) -> EResult<i32> {
	let path = userptr::copy_user_str(path_addr)?;
	vfs::rmdir(path.as_str())?;
	Ok(0)
}

/// Appends one `getdents` record — `{ino, off, reclen, type, name[]}` padded to 4 bytes — to
/// `out`, returning its length.
fn push_dirent(out: &mut Vec<u8>, inode: u64, off: u64, file_type: u32, name: &str) -> EResult<usize> {
	let name_len = name.len() + 1; // NUL terminator
	let unpadded = 8 + 8 + 2 + 1 + name_len;
	let reclen = (unpadded + 3) & !3;
	out.try_reserve(reclen).map_err(|_| Errno::ENOMEM)?;
	out.extend_from_slice(&inode.to_le_bytes());
	out.extend_from_slice(&off.to_le_bytes());
	out.extend_from_slice(&(reclen as u16).to_le_bytes());
	out.push(file_type as u8);
	out.extend_from_slice(name.as_bytes());
	out.push(0);
	out.resize(out.len() + (reclen - unpadded), 0);
	Ok(reclen)
}

pub fn getdents(fd: u32, buf_addr: u32, count: u32, pos_addr: u32) -> EResult<i32> {
	let current = scheduler::current_task().ok_or(Errno::ESRCH)?;
	let file = current.context.get_fd(fd)?;
	let pos_bytes = userptr::copy_from_user(pos_addr, 8)?;
	let mut pos = u64::from_le_bytes(pos_bytes.try_into().unwrap());
	let count = count as usize;
	let mut out = Vec::new();
	loop {
		let Some((entry, next)) = file.iterate(pos)? else {
			break;
		};
		let code = file_type_code(entry.file_type);
		let reclen = {
			let name_len = entry.name.len() + 1;
			(8 + 8 + 2 + 1 + name_len + 3) & !3
		};
		if out.len() + reclen > count {
			break;
		}
		push_dirent(&mut out, entry.inode, next, code, entry.name.as_str())?;
		pos = next;
	}
	userptr::copy_to_user(buf_addr, &out)?;
	userptr::copy_to_user(pos_addr, &pos.to_le_bytes())?;
	Ok(out.len() as i32)
}

pub fn chdir(path_addr: u32) -> EResult<i32> {
	let path = userptr::copy_user_str(path_addr)?;
	let current = scheduler::current_task().ok_or(Errno::ESRCH)?;
	let mut cwd = current.context.cwd.lock();
	vfs::chdir(&mut cwd, path.as_str())?;
	Ok(0)
}

pub fn getcwd(buf_addr: u32, size: u32) -> EResult<i32> {
	let current = scheduler::current_task().ok_or(Errno::ESRCH)?;
	let cwd = current.context.cwd.lock();
	let bytes = cwd.as_str().as_bytes();
	if bytes.len() + 1 > size as usize {
		return Err(Errno::ENAMETOOLONG);
	}
	userptr::copy_to_user(buf_addr, bytes)?;
	userptr::copy_to_user(buf_addr + bytes.len() as u32, &[0])?;
	Ok(bytes.len() as i32)
}
