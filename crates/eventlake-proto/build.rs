// Compiles the exchange protocol definitions into Rust types and the
// tonic service scaffolding at build time.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::compile_protos("proto/exchange.proto")?;
    Ok(())
}
