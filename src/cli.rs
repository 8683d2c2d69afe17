use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sensor-ingest",
    version,
    about = "Sensor reading ingestion service"
)]
pub struct Args {
    /// YAML settings file; overrides CONFIG_PATH.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Listen port; overrides PORT and the settings file.
    #[arg(long)]
    pub port: Option<u16>,
}
