fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::compile_protos("proto/pricehub.proto")?;
    println!("cargo:rerun-if-changed=proto/pricehub.proto");
    Ok(())
}
