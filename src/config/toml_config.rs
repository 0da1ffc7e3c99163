use crate::core::progress::ProgressOptions;
use crate::core::stage::DEFAULT_CAPACITY;
use crate::utils::error::{FlowError, Result};
use crate::utils::validation::{validate_path, validate_positive_number, validate_source, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub progress: ProgressOptions,
    pub transfer: TransferConfig,
    pub logging: LoggingConfig,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            // CLI 預設每 100ms 更新一次
            progress: ProgressOptions {
                time: 100,
                ..Default::default()
            },
            transfer: TransferConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// http(s) URL or local path.
    pub source: Option<String>,
    /// Where to write the data; without it the transfer is only measured.
    pub output: Option<String>,
    /// Channel capacity between stages, in chunks.
    pub capacity: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            source: None,
            output: None,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub verbose: bool,
    pub json: bool,
}

impl FlowConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = Self::substitute_env_vars(content)?;
        Ok(toml::from_str(&processed)?)
    }

    /// 替換環境變數 (例如 ${DOWNLOAD_URL})，未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| FlowError::config(e.to_string()))?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });
        Ok(result.into_owned())
    }

    pub fn source(&self) -> Result<&str> {
        self.transfer
            .source
            .as_deref()
            .ok_or_else(|| FlowError::MissingConfigError {
                field: "transfer.source".to_string(),
            })
    }
}

impl Validate for FlowConfig {
    fn validate(&self) -> Result<()> {
        validate_source("transfer.source", self.source()?)?;
        if let Some(output) = &self.transfer.output {
            validate_path("transfer.output", output)?;
        }
        validate_positive_number("transfer.capacity", self.transfer.capacity as u64, 1)?;
        self.progress.validate()
    }
}
