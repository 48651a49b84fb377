use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    application::{admin::AdminCacheError, jobs::ScheduleError},
    infra::error::InfraError,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Cache(#[from] AdminCacheError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// The error and each of its sources, outermost first.
    pub fn chain(&self) -> Vec<String> {
        let mut messages = vec![self.to_string()];
        let mut current = self.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::cache::ConfigStoreError;

    #[test]
    fn chain_lists_nested_sources() {
        let error = AppError::from(InfraError::from(ConfigStoreError::Write {
            path: "cache/quire/config.toml".into(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        }));

        let chain = error.chain();
        assert!(chain.first().is_some_and(|msg| msg.contains("cache options error")));
        assert!(chain.last().is_some_and(|msg| msg == "denied"));
    }
}
