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

//! The build-time configuration file.

use serde::Deserialize;
use std::{fs, io};

/// The debug section of the configuration file.
#[derive(Deserialize)]
struct ConfigDebug {
	/// If enabled, extra consistency checks run in the allocators and other hot paths that are
	/// too expensive to keep on unconditionally.
	debug: bool,
	/// If enabled, the kernel assumes it is running under QEMU and uses the `isa-debug-exit`
	/// device to report panics as a distinguishable exit code.
	qemu: bool,
}

/// The compilation configuration.
#[derive(Deserialize)]
pub struct Config {
	debug: ConfigDebug,
}

impl Config {
	/// Reads the configuration file, falling back to the default if the repository doesn't
	/// override it.
	pub fn read() -> io::Result<Self> {
		const FILE_DEFAULT: &str = "default.build-config.toml";
		const FILE: &str = "build-config.toml";

		println!("cargo:rerun-if-changed={FILE_DEFAULT}");
		println!("cargo:rerun-if-changed={FILE}");

		let config_str = match fs::read_to_string(FILE) {
			Ok(s) => s,
			Err(e) if e.kind() == io::ErrorKind::NotFound => fs::read_to_string(FILE_DEFAULT)?,
			Err(e) => return Err(e),
		};
		toml::from_str(&config_str).map_err(|e| io::Error::other(e.to_string()))
	}

	/// Emits the crate's `cfg` flags for the debug build according to the configuration.
	pub fn set_cfg(&self, debug_profile: bool) {
		if debug_profile && self.debug.debug {
			println!("cargo:rustc-cfg=config_debug_debug");
		}
		if self.debug.qemu {
			println!("cargo:rustc-cfg=config_debug_qemu");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_debug_table() {
		let config: Config = toml::from_str("[debug]\ndebug = true\nqemu = false\n").unwrap();
		assert!(config.debug.debug);
		assert!(!config.debug.qemu);
	}
}
