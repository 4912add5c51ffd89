fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(feature = "remote")]
    {
        tonic_build::configure()
            .build_server(false)
            .compile_protos(&["proto/instruction_asr.proto"], &["proto/"])?;
    }
    Ok(())
}
