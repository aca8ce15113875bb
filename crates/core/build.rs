// Build script for compiling protobuf definitions

fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var(
        "PROTOC",
        protoc_bin_vendored::protoc_bin_path().expect("failed to locate vendored protoc"),
    );
    prost_build::compile_protos(&["proto/vector_tile.proto"], &["proto/"])?;
    Ok(())
}
