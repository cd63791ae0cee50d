//! Build script - passes the esp-hal and defmt linker scripts to the
//! linker, but only for the embedded binary. Host test builds link
//! normally.

use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    if env::var_os("CARGO_FEATURE_EMBEDDED").is_none() {
        return;
    }

    // Linker scripts shipped by esp-hal (linkall.x) and defmt (defmt.x).
    println!("cargo:rustc-link-arg-bins=-Tlinkall.x");
    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
}
