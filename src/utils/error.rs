use crate::providers::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Provider call failed: {0}")]
    ProviderError(#[from] ProviderError),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration field '{field}' is invalid: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Invalid webhook payload: {message}")]
    PayloadError { message: String },

    #[error("Order {order_id} was already processed")]
    DuplicateOrder { order_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Network,
    Data,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl RelayError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::ProviderError(_) | RelayError::HttpError(_) => ErrorCategory::Network,
            RelayError::ConfigValidationError { .. }
            | RelayError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            RelayError::CsvError(_)
            | RelayError::SerializationError(_)
            | RelayError::PayloadError { .. }
            | RelayError::DuplicateOrder { .. } => ErrorCategory::Data,
            RelayError::IoError(_) => ErrorCategory::Storage,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RelayError::DuplicateOrder { .. } => ErrorSeverity::Low,
            RelayError::ProviderError(e) if !e.is_fatal() => ErrorSeverity::Medium,
            RelayError::HttpError(_) => ErrorSeverity::Medium,
            RelayError::ProviderError(_) => ErrorSeverity::Critical,
            RelayError::IoError(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            RelayError::ProviderError(e) if e.is_fatal() => {
                "Check the provider token in the configuration; retrying will not help"
            }
            RelayError::ProviderError(_) | RelayError::HttpError(_) => {
                "The provider may be temporarily unavailable, try again later"
            }
            RelayError::CsvError(_) => "Make sure every service row has exactly 3 columns",
            RelayError::IoError(_) => "Check that the data directory exists and is writable",
            RelayError::SerializationError(_) | RelayError::PayloadError { .. } => {
                "Inspect the input JSON, it does not match the expected webhook shape"
            }
            RelayError::DuplicateOrder { .. } => "Nothing to do, the order is already stored",
            _ => "Review the configuration file and environment variables",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Network => format!("Provider communication failed: {}", self),
            ErrorCategory::Data => format!("Input data problem: {}", self),
            ErrorCategory::Storage => format!("Storage problem: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
