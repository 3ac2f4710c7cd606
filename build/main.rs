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

//! The build script reads the configuration file and wires up the linker script. Unlike the
//! teacher this core is grounded on, there is no architecture to pick (the kernel only ever
//! targets i686) and nothing here to compile out of a C toolchain, so this is considerably
//! shorter.

pub mod config;

use config::Config;
use std::{env, path::Path, process::exit};

fn main() {
	let profile = env::var("PROFILE").unwrap_or_default();
	let config = Config::read().unwrap_or_else(|e| {
		eprintln!("failed to read build configuration file: {e}");
		exit(1);
	});
	config.set_cfg(profile == "debug");

	let linker_script = Path::new("linker.ld");
	println!("cargo:rerun-if-changed={}", linker_script.display());
	println!("cargo:rustc-link-arg=-T{}", linker_script.display());
	// The higher-half mapping above assumes ordinary 4KiB pages; a larger alignment would leave
	// gaps the direct map doesn't cover.
	println!("cargo:rustc-link-arg=-zmax-page-size=0x1000");
}
