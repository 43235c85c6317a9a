// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Crate-level error type.
//!
//! Each layer keeps its own error ([`crate::install::InstallError`],
//! [`crate::dispatch::ActionError`], the manifest's validation errors).
//! [`Error`] wraps them for code that crosses layers.

use thiserror::Error;

use marina_manifest::ValidationErrors;

use crate::config::ConfigError;
use crate::dispatch::ActionError;
use crate::install::InstallError;

/// Result type using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by marina-core.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Validation(#[from] ValidationErrors),
}

impl Error {
    /// HTTP-like status code: install errors keep their own, validation
    /// failures are bad requests and everything else is internal.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Install(e) => e.status_code(),
            Error::Validation(_) | Error::Action(ActionError::Invalid(_)) => 400,
            Error::Action(ActionError::Validation(_)) => 400,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marina_manifest::{ResourceKind, ValidationError};

    #[test]
    fn test_layer_errors_convert() {
        let err: Error = InstallError::NotFound("installed app 3 not found".into()).into();
        assert_eq!(err.to_string(), "installed app 3 not found");
        assert_eq!(err.status_code(), 404);

        let err: Error = ConfigError::Missing("MARINA_DATABASE_URL").into();
        assert!(err.to_string().contains("MARINA_DATABASE_URL"));
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_validation_errors_are_bad_requests() {
        let err: Error = ActionError::Validation(ValidationError::NameEmpty {
            kind: ResourceKind::Workflow,
        })
        .into();
        assert_eq!(err.status_code(), 400);
    }
}
