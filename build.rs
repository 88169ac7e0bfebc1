fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Compile proto files (protox stands in for a system protoc)
    let file_descriptors = protox::compile(["proto/aggregator.proto"], ["proto"])?;
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_fds(file_descriptors)?;

    // Re-run if proto files change
    println!("cargo:rerun-if-changed=proto/aggregator.proto");

    Ok(())
}
