use std::path::Path;

pub mod run;

/// Writes the agent config and the pipeline of a test in `dir`.
///
/// The pipeline is only reloaded on SIGHUP.
pub fn write_config(dir: &Path, pipeline: &str) -> anyhow::Result<()> {
    std::fs::write(
        dir.join("weft.toml"),
        "pipeline_file = \"pipeline.weft\"\nreload_interval = \"0s\"\nstop_timeout = \"2s\"\nshutdown_timeout = \"5s\"\n",
    )?;
    std::fs::write(dir.join("pipeline.weft"), pipeline)?;
    Ok(())
}
