pub mod toml_config;

pub use toml_config::{FlowConfig, LoggingConfig, TransferConfig};

#[cfg(feature = "cli")]
use crate::utils::error::Result;
#[cfg(feature = "cli")]
use clap::Parser;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "small-flow")]
#[command(about = "Stream a file or URL to disk while reporting progress")]
pub struct CliConfig {
    /// http(s) URL or local file to read
    pub source: Option<String>,

    #[arg(short, long, help = "Write the data here instead of discarding it")]
    pub output: Option<String>,

    #[arg(short, long, help = "TOML configuration file")]
    pub config: Option<String>,

    #[arg(long, help = "Expected total size in bytes (0 = detect)")]
    pub length: Option<u64>,

    #[arg(long, help = "Milliseconds between progress reports")]
    pub time: Option<u64>,

    #[arg(long, help = "Speed averaging window in milliseconds")]
    pub speed: Option<u64>,

    #[arg(long, help = "Channel capacity between stages")]
    pub capacity: Option<usize>,

    #[arg(long, help = "Emit JSON log lines")]
    pub json: bool,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

#[cfg(feature = "cli")]
impl CliConfig {
    /// 合併設定檔與命令列參數，命令列優先
    pub fn resolve(&self) -> Result<FlowConfig> {
        let mut config = match &self.config {
            Some(path) => FlowConfig::from_file(path)?,
            None => FlowConfig::default(),
        };

        if let Some(source) = &self.source {
            config.transfer.source = Some(source.clone());
        }
        if let Some(output) = &self.output {
            config.transfer.output = Some(output.clone());
        }
        if let Some(length) = self.length {
            config.progress.length = length;
        }
        if let Some(time) = self.time {
            config.progress.time = time;
        }
        if let Some(speed) = self.speed {
            config.progress.speed = speed;
        }
        if let Some(capacity) = self.capacity {
            config.transfer.capacity = capacity;
        }
        config.logging.verbose |= self.verbose;
        config.logging.json |= self.json;

        Ok(config)
    }
}
