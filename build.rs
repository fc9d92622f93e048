//! Build script for eom_regulator
//!
//! Compiles `tests/fixtures/eom_fake.c` into two shared libraries for the
//! native-library integration tests: a complete one and one without
//! `EOM_Start`. Only done on Unix hosts building for themselves; when no C
//! compiler is available the build goes on and those tests are compiled out.

use std::env;
use std::path::{Path, PathBuf};

const FIXTURE_SOURCE: &str = "tests/fixtures/eom_fake.c";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed={FIXTURE_SOURCE}");
    println!("cargo:rustc-check-cfg=cfg(eom_fake_driver)");

    let family = env::var("CARGO_CFG_TARGET_FAMILY").unwrap_or_default();
    if family != "unix" || env::var("HOST")? != env::var("TARGET")? {
        return Ok(());
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let extension = if env::var("CARGO_CFG_TARGET_OS").unwrap_or_default() == "macos" {
        "dylib"
    } else {
        "so"
    };
    let complete = out_dir.join(format!("libeom_fake.{extension}"));
    let without_start = out_dir.join(format!("libeom_fake_no_start.{extension}"));

    let built = compile_fixture(&complete, &[])
        .and_then(|()| compile_fixture(&without_start, &["-DEOM_FAKE_OMIT_START"]));
    match built {
        Ok(()) => {
            println!("cargo:rustc-cfg=eom_fake_driver");
            println!("cargo:rustc-env=EOM_FAKE_DRIVER={}", complete.display());
            println!("cargo:rustc-env=EOM_FAKE_DRIVER_NO_START={}", without_start.display());
        }
        Err(reason) => {
            println!("cargo:warning=fake EOM driver not built, native library tests skipped: {reason}");
        }
    }
    Ok(())
}

fn compile_fixture(output: &Path, defines: &[&str]) -> Result<(), String> {
    let compiler = cc::Build::new()
        .cargo_metadata(false)
        .try_get_compiler()
        .map_err(|e| e.to_string())?;

    let status = compiler
        .to_command()
        .args(["-shared", "-fPIC"])
        .args(defines)
        .arg("-o")
        .arg(output)
        .arg(FIXTURE_SOURCE)
        .status()
        .map_err(|e| format!("cannot run {}: {e}", compiler.path().display()))?;

    if status.success() {
        Ok(())
    } else {
        Err(format!("{} exited with {status}", compiler.path().display()))
    }
}
