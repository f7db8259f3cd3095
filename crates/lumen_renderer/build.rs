// Build script for linking Embree library
//
// Only needed with the `embree` feature. Install Embree 4 system-wide or via
// vcpkg (vcpkg install embree[geometry-triangle]:x64-windows).

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    if std::env::var_os("CARGO_FEATURE_EMBREE").is_none() {
        return;
    }

    // Embree 4 library name (vcpkg installs embree4.lib)
    println!("cargo:rustc-link-lib=embree4");

    if let Ok(vcpkg_root) = std::env::var("VCPKG_ROOT") {
        let lib_path = format!("{}\\installed\\x64-windows\\lib", vcpkg_root);
        println!("cargo:rustc-link-search=native={}", lib_path);
    }
}
