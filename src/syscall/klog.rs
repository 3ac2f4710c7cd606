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

//! The `log` syscall: a direct passthrough from a user message into the kernel log.
//!
//! Named `klog` rather than `log` to avoid shadowing [`crate::log`].

use crate::syscall::userptr;
use utils::errno::EResult;

/// Upper bound on one `log` syscall's message, independent of [`userptr::copy_from_user`]'s own
/// limits.
const MAX_MSG: u32 = 4096;

pub fn log(msg_addr: u32, len: u32) -> EResult<i32> {
	let len = len.min(MAX_MSG);
	let bytes = userptr::copy_from_user(msg_addr, len as usize)?;
	match core::str::from_utf8(&bytes) {
		Ok(s) => crate::log::info!("{s}"),
		Err(_) => crate::log::info!("{}", "<user log message was not valid UTF-8>"),
	}
	Ok(len as i32)
}
