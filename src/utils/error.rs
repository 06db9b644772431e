use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("HTTP client error: {0}")]
    HttpClientError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Profile service unavailable for user {username}: {reason}")]
    ProfileUnavailable { username: String, reason: String },

    #[error("Malformed profile response for user {username}: {reason}")]
    ProfileMalformed { username: String, reason: String },

    #[error("User {username} does not have ActiveSync enabled")]
    ActiveSyncDisabled { username: String },

    #[error("Device registration failed for user {username}: {reason}")]
    RegistrationNotifyFailed { username: String, reason: String },

    #[error("Backend dispatch to {target} failed: {reason}")]
    BackendDispatchFailed { target: String, reason: String },

    #[error("Admin command error: {message}")]
    CommandError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    Resolution,
    Notification,
    Dispatch,
    Io,
}

impl RouterError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RouterError::ConfigError { .. }
            | RouterError::MissingConfigError { .. }
            | RouterError::InvalidConfigValueError { .. } => ErrorCategory::Config,
            RouterError::ProfileUnavailable { .. }
            | RouterError::ProfileMalformed { .. }
            | RouterError::ActiveSyncDisabled { .. } => ErrorCategory::Resolution,
            RouterError::RegistrationNotifyFailed { .. } => ErrorCategory::Notification,
            RouterError::BackendDispatchFailed { .. } | RouterError::HttpClientError(_) => {
                ErrorCategory::Dispatch
            }
            RouterError::IoError(_) | RouterError::CommandError { .. } => ErrorCategory::Io,
        }
    }

    /// Short machine-friendly label used in log fields.
    pub fn reason_code(&self) -> &'static str {
        match self {
            RouterError::ProfileUnavailable { .. } => "profile_unavailable",
            RouterError::ProfileMalformed { .. } => "profile_malformed",
            RouterError::ActiveSyncDisabled { .. } => "activesync_disabled",
            RouterError::RegistrationNotifyFailed { .. } => "registration_failed",
            RouterError::BackendDispatchFailed { .. } => "backend_dispatch_failed",
            RouterError::HttpClientError(_) => "http_client",
            RouterError::CommandError { .. } => "command",
            RouterError::IoError(_) => "io",
            RouterError::ConfigError { .. }
            | RouterError::MissingConfigError { .. }
            | RouterError::InvalidConfigValueError { .. } => "config_invalid",
        }
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
