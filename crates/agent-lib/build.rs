//! Build script for generating protobuf code
//!
//! Generation runs only with the `proto-gen` feature and a usable protoc;
//! otherwise the checked-in message types in `src/proto` are used.

use std::path::PathBuf;
use std::process::Command;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/topology/v1/topology.proto");

    if std::env::var_os("CARGO_FEATURE_PROTO_GEN").is_none() {
        return Ok(());
    }

    let protoc_available =
        std::env::var("PROTOC").is_ok() || Command::new("protoc").arg("--version").output().is_ok();

    if !protoc_available {
        println!("cargo:warning=protoc not found, skipping proto generation");
        println!("cargo:warning=Install protoc or set PROTOC env var to generate proto code");
        return Ok(());
    }

    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);

    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .out_dir(&out_dir)
        .compile(&["proto/topology/v1/topology.proto"], &["proto"])?;

    Ok(())
}
