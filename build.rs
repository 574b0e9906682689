fn main() -> Result<(), Box<dyn std::error::Error>> {
    let schema = "proto/realtime.proto";
    println!("cargo:rerun-if-changed={schema}");
    tonic_build::compile_protos(schema)?;
    Ok(())
}
