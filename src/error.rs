//! Error types for the bastion core.
//!
//! The detector and the gate never fail; their outcomes are decision values.
//! Errors only come from configuration loading and the audit pipeline.

use thiserror::Error;

/// Central error type for all bastion operations.
#[derive(Debug, Error)]
pub enum BastionError {
    /// Configuration error (malformed cooldown list, unreadable file).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Outbound AI quota exhausted.
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Milliseconds to wait before retry.
        retry_after_ms: u64,
    },

    /// The report generator failed.
    #[error("Report generation error: {0}")]
    ReportGeneration(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(String),
}

impl BastionError {
    /// Log error with full context using tracing.
    pub fn log_with_context(&self, context: &ErrorContext) {
        match self {
            // Quota exhaustion is expected under load
            Self::RateLimited { retry_after_ms } => {
                tracing::warn!(
                    error = %self,
                    request_id = %context.request_id,
                    guild_id = ?context.guild_id,
                    command = ?context.command,
                    operation = %context.operation,
                    retry_after_ms = retry_after_ms,
                    "Rate limited"
                );
            }
            Self::ReportGeneration(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    guild_id = ?context.guild_id,
                    command = ?context.command,
                    operation = %context.operation,
                    "Report generation failed"
                );
            }
            Self::Config(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    operation = %context.operation,
                    "Configuration error"
                );
            }
            Self::Io(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    operation = %context.operation,
                    "IO error"
                );
            }
        }
    }

    /// Get user-friendly error message (hides internal details).
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Config(_) => "Service configuration error",
            Self::RateLimited { .. } => "AI service is busy, please try again later",
            Self::ReportGeneration(_) => "Report could not be generated right now",
            Self::Io(_) => "Service I/O error",
        }
    }
}

/// Context information for error logging.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Unique request identifier for correlation
    pub request_id: String,
    /// Guild ID if available
    pub guild_id: Option<String>,
    /// Command name if available
    pub command: Option<String>,
    /// Operation being performed
    pub operation: String,
}

impl ErrorContext {
    /// Create a new error context.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            guild_id: None,
            command: None,
            operation: operation.into(),
        }
    }

    pub fn with_guild_id(mut self, guild_id: impl Into<String>) -> Self {
        self.guild_id = Some(guild_id.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

}

/// Result type alias for bastion operations.
pub type Result<T> = std::result::Result<T, BastionError>;
