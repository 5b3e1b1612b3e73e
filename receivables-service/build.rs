fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR")?);

    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }
    let well_known_types = protoc_bin_vendored::include_path()?;

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .file_descriptor_set_path(out_dir.join("receivables_descriptor.bin"))
        .compile_protos(
            &["../proto/micros/receivables/v1/receivables.proto"],
            &[std::path::PathBuf::from("../proto"), well_known_types],
        )?;

    println!("cargo:rerun-if-changed=../proto/micros/receivables/v1/receivables.proto");

    Ok(())
}
