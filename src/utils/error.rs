use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Stage '{stage}' failed: {message}")]
    StageError { stage: String, message: String },
}

pub type Result<T> = std::result::Result<T, FlowError>;

/// 在事件匯流排上傳遞的錯誤，多個訂閱者共享同一個實例
pub type SharedError = Arc<FlowError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Network,
    Io,
    Data,
    Stage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl FlowError {
    pub fn config(message: impl Into<String>) -> Self {
        FlowError::ConfigError {
            message: message.into(),
        }
    }

    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        FlowError::StageError {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            FlowError::HttpError(_) => ErrorCategory::Network,
            FlowError::IoError(_) => ErrorCategory::Io,
            FlowError::SerializationError(_) => ErrorCategory::Data,
            FlowError::TomlError(_)
            | FlowError::ConfigError { .. }
            | FlowError::InvalidConfigValueError { .. }
            | FlowError::MissingConfigError { .. } => ErrorCategory::Configuration,
            FlowError::StageError { .. } => ErrorCategory::Stage,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Data | ErrorCategory::Stage => ErrorSeverity::High,
            ErrorCategory::Configuration | ErrorCategory::Io => ErrorSeverity::Critical,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            FlowError::HttpError(e) => match e.status() {
                Some(status) => format!("Remote source answered with HTTP {}", status),
                None => "Could not reach the remote source".to_string(),
            },
            FlowError::IoError(e) => format!("File operation failed: {}", e),
            FlowError::InvalidConfigValueError { field, reason, .. } => {
                format!("Option '{}' is invalid: {}", field, reason)
            }
            FlowError::MissingConfigError { field } => {
                format!("Option '{}' is required", field)
            }
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Network => "Check the URL and your network connection, then retry",
            ErrorCategory::Io => "Check that the path exists and is readable/writable",
            ErrorCategory::Configuration => "Review the command line flags or the TOML config file",
            ErrorCategory::Data => "Inspect the input data for malformed content",
            ErrorCategory::Stage => "Re-run with --verbose to see which stage failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_is_critical() {
        let err = FlowError::config("At least two stages required");
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert_eq!(
            err.to_string(),
            "Configuration error: At least two stages required"
        );
    }

    #[test]
    fn test_stage_error_message() {
        let err = FlowError::stage("upper", "boom");
        assert_eq!(err.category(), ErrorCategory::Stage);
        assert_eq!(err.to_string(), "Stage 'upper' failed: boom");
        assert_eq!(err.user_friendly_message(), "Stage 'upper' failed: boom");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.bin");
        let err: FlowError = io.into();
        assert_eq!(err.category(), ErrorCategory::Io);
        assert!(err.user_friendly_message().contains("missing.bin"));
    }
}
