// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! GitOps install pipeline.
//!
//! An install moves through `DEPLOY_INIT → GIT_SUCCESS → ACD_SUCCESS →
//! DEPLOY_SUCCESS`. The DB phase runs inside one transaction; every later
//! phase is idempotent and resumes from the stored status, so a retry or a
//! redelivered bulk message picks up where the previous attempt stopped.
//!
//! ```text
//! request ──db phase (txn)──▶ DEPLOY_INIT
//!                               │
//!            ┌──────────────────┼───────────────────┐
//!            ▼                  ▼                   ▼
//!        argo_cd              helm          manifest_download
//!   GIT ─▶ ACD ─▶ DEPLOY   install_release     DEPLOY_SUCCESS
//! ```

pub mod db_phase;
pub mod delete;
pub mod deploy;
pub mod gitops;
pub mod history;
pub mod request;
pub mod rollback;
pub mod status;
pub mod upgrade;

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::collaborators::{CollaboratorError, CollaboratorResult, Collaborators};
use crate::config::Config;
use crate::persistence::InstallStore;

pub use delete::DeleteInstalledAppRequest;
pub use history::DeploymentHistoryEntry;
pub use request::{InstallAppVersionDto, InstallAppVersionRequest};
pub use rollback::RollbackRequest;
pub use status::{HistoryStatus, InstallStatus, UnknownStatus};
pub use upgrade::UpdateInstalledAppRequest;

/// Whether the full product or only the agent-side subset runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppOfferingMode {
    #[default]
    Full,
    /// Agent-only mode; environments are created on demand.
    Hyperion,
}

/// How an installed app reaches the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentAppType {
    Helm,
    ArgoCd,
    ManifestDownload,
}

impl DeploymentAppType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentAppType::Helm => "helm",
            DeploymentAppType::ArgoCd => "argo_cd",
            DeploymentAppType::ManifestDownload => "manifest_download",
        }
    }
}

impl FromStr for DeploymentAppType {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "helm" => Ok(DeploymentAppType::Helm),
            "argo_cd" => Ok(DeploymentAppType::ArgoCd),
            "manifest_download" => Ok(DeploymentAppType::ManifestDownload),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Install pipeline errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InstallError {
    /// The request cannot be served as asked.
    #[error("{internal_message}")]
    BadRequest {
        internal_message: String,
        user_message: String,
    },

    #[error("{0}")]
    NotFound(String),

    /// GIT phase failure; the install is left in `GIT_ERROR`.
    #[error("git phase failed: {0}")]
    Git(CollaboratorError),

    /// ACD phase or release-controller failure.
    #[error("{0}")]
    Acd(String),

    /// Release manager failure; the install is left in `HELM_ERROR`.
    #[error("helm install failed: {0}")]
    Helm(CollaboratorError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt install state: {0}")]
    State(#[from] UnknownStatus),

    #[error("cancelled")]
    Cancelled,
}

impl InstallError {
    pub(crate) fn bad_request(internal: impl Into<String>, user: impl Into<String>) -> Self {
        InstallError::BadRequest {
            internal_message: internal.into(),
            user_message: user.into(),
        }
    }

    /// HTTP-like status code of the error.
    pub fn status_code(&self) -> u16 {
        match self {
            InstallError::BadRequest { .. } => 400,
            InstallError::NotFound(_) => 404,
            InstallError::Collaborator(e) if e.is_not_found() => 404,
            _ => 500,
        }
    }

    /// Diagnostic message.
    pub fn internal_message(&self) -> String {
        self.to_string()
    }

    /// Actionable message for the caller.
    pub fn user_message(&self) -> String {
        match self {
            InstallError::BadRequest { user_message, .. } => user_message.clone(),
            other => other.to_string(),
        }
    }
}

/// Result type for install operations.
pub type Result<T> = std::result::Result<T, InstallError>;

/// Install pipeline knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSettings {
    /// Timeout around register + create + sync.
    pub acd_timeout: Duration,
    pub app_offering_mode: AppOfferingMode,
    /// Caller-selected deployment types are ignored in internal-use mode.
    pub internal_use: bool,
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            acd_timeout: Duration::from_secs(60),
            app_offering_mode: AppOfferingMode::Full,
            internal_use: false,
        }
    }
}

impl InstallSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            acd_timeout: config.acd_timeout,
            app_offering_mode: config.app_offering_mode,
            internal_use: config.internal_use,
        }
    }
}

/// Drives installs through the store and the collaborators.
#[derive(Clone)]
pub struct InstallService {
    store: Arc<dyn InstallStore>,
    collaborators: Collaborators,
    settings: InstallSettings,
}

impl InstallService {
    pub fn new(
        store: Arc<dyn InstallStore>,
        collaborators: Collaborators,
        settings: InstallSettings,
    ) -> Self {
        Self {
            store,
            collaborators,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn InstallStore> {
        &self.store
    }

    pub fn settings(&self) -> &InstallSettings {
        &self.settings
    }

    /// Guarded status write. A rejected transition is logged and reported
    /// as `false`, never as an error.
    pub(crate) async fn transition(&self, installed_app_id: i64, to: InstallStatus) -> Result<bool> {
        let changed = self.store.update_status(installed_app_id, to).await?;
        if changed {
            info!(installed_app_id, status = %to, "Install status updated");
        } else {
            warn!(installed_app_id, status = %to, "Install status transition ignored");
        }
        Ok(changed)
    }

    /// Terminal history write; a row that is already terminal stays as is.
    pub(crate) async fn finalize(&self, history_id: i64, status: HistoryStatus) -> Result<()> {
        if !self.store.finalize_history(history_id, status).await? {
            warn!(history_id, status = %status, "History row already terminal");
        }
        Ok(())
    }
}

/// Race a collaborator call against the cancellation token.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = CollaboratorResult<T>>,
) -> CollaboratorResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CollaboratorError::Cancelled),
        result = call => result,
    }
}
