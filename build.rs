//! This build script handles:
//! - Exposing build-time information to the firmware.
//! - Copying `memory.x` to the output directory to allow the firmware to be
//!   linked.
//!
//! ## Build-time information
//!
//! `built` writes the package version, profile and git state to OUT_DIR,
//! and `util::built` logs it at boot.
//!
//! ## `memory.x` file handling
//!
//! When building for a Pico or Pico 2, this build script copies the
//! appropriate memory.x file from the `link/` dir into a directory where
//! the linker can find it at link time.  Host builds (used for the protocol
//! tests) skip this.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

// memory.x handling derived from embassy-rs examples.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

fn main() {
    // Re-run this build script if anything in git changes.
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");

    // Re-run this build script of DEFMT_LOG changes.
    println!("cargo:rerun-if-env-changed=DEFMT_LOG");

    // Get built-time information
    built::write_built_file().expect("Failed to acquire build-time information");

    #[cfg(any(feature = "pico", feature = "pico2"))]
    firmware_link();
}

#[cfg(any(feature = "pico", feature = "pico2"))]
fn firmware_link() {
    // RP2040 and RP235X use different memory.x files.  Neither file may be
    // called memory.x, or the linker will pick it up from our root
    // directory, instead of the version we put in OUT_DIR.
    #[cfg(feature = "pico")]
    let memory_x = {
        println!("cargo:rerun-if-changed=link/memory.rp2040.x");
        include_bytes!("link/memory.rp2040.x").as_slice()
    };
    #[cfg(all(feature = "pico2", not(feature = "pico")))]
    let memory_x = {
        println!("cargo:rerun-if-changed=link/memory.rp235x.x");
        include_bytes!("link/memory.rp235x.x").as_slice()
    };

    // Put `memory.x` in our output directory and ensure it's on the linker
    // search path.
    let out = &PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR not set"));
    File::create(out.join("memory.x"))
        .expect("Failed to create memory.x")
        .write_all(memory_x)
        .expect("Failed to write memory.x");
    println!("cargo:rustc-link-search={}", out.display());

    // Set embassy linker arguments for the binary.
    println!("cargo:rustc-link-arg-bins=--nmagic");
    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
    println!("cargo:rustc-link-arg-bins=-Tdevice.x");

    // Only RP2040 uses this linker file.
    #[cfg(feature = "pico")]
    println!("cargo:rustc-link-arg-bins=-Tlink-rp.x");
}
