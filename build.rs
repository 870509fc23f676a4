use std::fs;

fn main() {
    // Keep the VERSION file and Cargo.toml in lockstep for release tooling.
    let version_file = fs::read_to_string("VERSION")
        .expect("VERSION file not found - run: echo '0.3.0' > VERSION");

    let version = version_file.trim();
    let cargo_version = env!("CARGO_PKG_VERSION");

    if version != cargo_version {
        panic!(
            "\n\nVERSION MISMATCH!\nVERSION file: {}\nCargo.toml:   {}\n\nUpdate both before building a release.\n\n",
            version, cargo_version
        );
    }

    println!("cargo:rerun-if-changed=VERSION");
}
