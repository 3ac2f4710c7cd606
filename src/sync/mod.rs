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

//! Synchronization primitives layered on top of [`utils::lock`]'s spinlocks.
//!
//! [`utils::lock::Spin`]/[`utils::lock::IntMutex`] busy-wait and are the right tool for the short
//! critical sections inside the allocators and the scheduler itself. [`mutex`] is for everything
//! else: a sleeping lock a task can hold across a long operation without burning its whole time
//! slice spinning.

pub mod mutex;
