//! Alerting error types

use thiserror::Error;

/// Alert fan-out errors
#[derive(Debug, Error)]
pub enum AlertError {
    /// Notifier creation error
    #[error("failed to create notifier '{name}': {message}")]
    NotifierCreation { name: String, message: String },

    /// Contract-level error
    #[error("alert error: {0}")]
    Contract(#[from] contracts::ContractError),
}

impl AlertError {
    /// Create a notifier creation error
    pub fn notifier_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotifierCreation {
            name: name.into(),
            message: message.into(),
        }
    }
}
