// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while collecting or materializing metricset data
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("Failed to fetch {metric_set}: {reason}")]
    Fetch { metric_set: String, reason: String },

    #[error("No events were generated")]
    NoEvents,

    #[error("No events satisfied the condition")]
    NoMatchingEvent,

    #[error("Failed to write fixture: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ModuleError {
    pub fn fetch(metric_set: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Fetch {
            metric_set: metric_set.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors raised by a [`crate::publisher::Publisher`] when it is closed
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Publisher already closed")]
    AlreadyClosed,

    #[error("Failed to close publisher: {0}")]
    Close(String),
}

/// Errors raised while loading the agent configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
