use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-env-changed=EPICS_BASE");
    println!("cargo:rerun-if-env-changed=EPICS_HOST_ARCH");

    if env::var_os("CARGO_FEATURE_LIBCA").is_none() {
        return;
    }

    let Some(base) = env::var_os("EPICS_BASE") else {
        println!("cargo:warning=EPICS_BASE is not set; relying on the default linker search path for libca");
        return;
    };
    let arch = env::var("EPICS_HOST_ARCH").unwrap_or_else(|_| default_host_arch());
    let lib_dir = PathBuf::from(base).join("lib").join(arch);
    println!("cargo:rustc-link-search=native={}", lib_dir.display());
}

fn default_host_arch() -> String {
    let os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    match (os.as_str(), arch.as_str()) {
        ("linux", "x86_64") => "linux-x86_64",
        ("linux", "aarch64") => "linux-aarch64",
        ("macos", "aarch64") => "darwin-aarch64",
        ("macos", "x86_64") => "darwin-x86",
        ("windows", "x86_64") => "windows-x64",
        _ => "unknown",
    }
    .to_string()
}
