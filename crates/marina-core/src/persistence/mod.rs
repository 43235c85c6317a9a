// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable install state.
//!
//! The install pipeline writes through [`InstallStore`]. Multi-row phases
//! open an [`InstallTxn`] and commit it explicitly; single-row transitions
//! go straight to the store as conditional updates.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;

use crate::collaborators::AppRecord;
use crate::install::status::{HistoryStatus, InstallStatus};

/// Result of a store call.
pub type StoreResult<T> = std::result::Result<T, sqlx::Error>;

/// One (app, environment) install.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct InstalledAppRecord {
    pub id: i64,
    pub app_id: i64,
    pub environment_id: i64,
    /// Storage string of an [`InstallStatus`].
    pub status: String,
    /// Storage string of a [`crate::install::DeploymentAppType`].
    pub deployment_app_type: String,
    pub git_ops_repo_name: Option<String>,
    pub active: bool,
    pub created_by: i64,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct InstalledAppVersionRecord {
    pub id: i64,
    pub installed_app_id: i64,
    pub app_store_application_version_id: i64,
    pub values_yaml: String,
    pub active: bool,
    pub reference_value_id: Option<i64>,
    pub reference_value_kind: Option<String>,
    pub created_by: i64,
    pub created_on: DateTime<Utc>,
}

/// One deployment attempt. Rows are never deleted; only `status`,
/// `finished_on` and `git_hash` change after insert.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct HistoryRecord {
    pub id: i64,
    pub installed_app_version_id: i64,
    pub values_yaml_raw: String,
    pub git_hash: Option<String>,
    pub status: String,
    pub started_on: DateTime<Utc>,
    pub finished_on: Option<DateTime<Utc>>,
    pub helm_release_status_config: Option<String>,
    pub created_by: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ChartGroupDeploymentRecord {
    pub id: i64,
    pub chart_group_id: i64,
    pub chart_group_entry_id: Option<i64>,
    pub installed_app_id: i64,
    pub group_installation_id: String,
    pub deleted: bool,
    pub created_by: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewApp {
    pub app_name: String,
    pub team_id: Option<i64>,
    pub created_by: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInstalledApp {
    pub app_id: i64,
    pub environment_id: i64,
    pub status: InstallStatus,
    pub deployment_app_type: String,
    pub git_ops_repo_name: Option<String>,
    pub created_by: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInstalledAppVersion {
    pub installed_app_id: i64,
    pub app_store_application_version_id: i64,
    pub values_yaml: String,
    pub reference_value_id: Option<i64>,
    pub reference_value_kind: Option<String>,
    pub created_by: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistory {
    pub installed_app_version_id: i64,
    pub values_yaml_raw: String,
    pub git_hash: Option<String>,
    pub status: HistoryStatus,
    pub helm_release_status_config: Option<String>,
    pub created_by: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChartGroupDeployment {
    pub chart_group_id: i64,
    pub chart_group_entry_id: Option<i64>,
    pub installed_app_id: i64,
    pub group_installation_id: String,
    pub created_by: i64,
}

/// An open transaction. Dropping it without [`InstallTxn::commit`] rolls back.
#[async_trait]
pub trait InstallTxn: Send {
    /// Active apps with this name, oldest first.
    async fn find_active_apps_by_name(&mut self, name: &str) -> StoreResult<Vec<AppRecord>>;

    async fn insert_app(&mut self, app: &NewApp) -> StoreResult<AppRecord>;

    /// Write back `active` and `team_id` of an app.
    async fn update_app(&mut self, app: &AppRecord) -> StoreResult<()>;

    async fn insert_installed_app(
        &mut self,
        installed_app: &NewInstalledApp,
    ) -> StoreResult<InstalledAppRecord>;

    /// Deactivate every active version of the installed app, then insert
    /// the new one as the only active version.
    async fn insert_installed_app_version(
        &mut self,
        version: &NewInstalledAppVersion,
    ) -> StoreResult<InstalledAppVersionRecord>;

    async fn insert_history(&mut self, history: &NewHistory) -> StoreResult<HistoryRecord>;

    async fn insert_chart_group_deployment(
        &mut self,
        deployment: &NewChartGroupDeployment,
    ) -> StoreResult<ChartGroupDeploymentRecord>;

    /// Mark the installed app and all its versions inactive. Returns false
    /// when the installed app was already inactive.
    async fn deactivate_installed_app(&mut self, installed_app_id: i64) -> StoreResult<bool>;

    /// Guarded status transition, see [`InstallStore::update_status`].
    async fn update_status(&mut self, installed_app_id: i64, to: InstallStatus)
    -> StoreResult<bool>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Storage of apps, installs, versions, history and chart-group deployments.
#[async_trait]
pub trait InstallStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn InstallTxn>>;

    async fn get_app(&self, app_id: i64) -> StoreResult<Option<AppRecord>>;

    async fn get_installed_app(&self, installed_app_id: i64)
    -> StoreResult<Option<InstalledAppRecord>>;

    async fn get_installed_app_version(
        &self,
        installed_app_version_id: i64,
    ) -> StoreResult<Option<InstalledAppVersionRecord>>;

    async fn active_installed_app_version(
        &self,
        installed_app_id: i64,
    ) -> StoreResult<Option<InstalledAppVersionRecord>>;

    async fn get_history(&self, history_id: i64) -> StoreResult<Option<HistoryRecord>>;

    /// Every history row across all versions of an installed app, oldest first.
    async fn list_history_for_installed_app(
        &self,
        installed_app_id: i64,
    ) -> StoreResult<Vec<HistoryRecord>>;

    /// Move an installed app to `to` if its current status is one of
    /// `to.predecessors()`. Returns whether the row changed.
    async fn update_status(&self, installed_app_id: i64, to: InstallStatus) -> StoreResult<bool>;

    async fn record_git_hash(&self, history_id: i64, git_hash: &str) -> StoreResult<()>;

    /// Set a terminal status and `finished_on` if the row is still
    /// `Unknown` or `InProgress`. Returns whether the row changed.
    async fn finalize_history(&self, history_id: i64, status: HistoryStatus) -> StoreResult<bool>;

    async fn append_history(&self, history: &NewHistory) -> StoreResult<HistoryRecord>;

    async fn list_chart_group_deployments(
        &self,
        group_installation_id: &str,
    ) -> StoreResult<Vec<ChartGroupDeploymentRecord>>;

    /// Round-trip a trivial query.
    async fn health_check(&self) -> StoreResult<()>;
}

/// Open the store named by `database_url` (`sqlite:` URLs pick SQLite,
/// anything else PostgreSQL), apply pending migrations and check it answers.
pub async fn connect(database_url: &str, max_connections: u32) -> crate::Result<Arc<dyn InstallStore>> {
    let store: Arc<dyn InstallStore> = if database_url.starts_with("sqlite:") {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        crate::migrations::run_sqlite(&pool).await?;
        Arc::new(SqliteStore::new(pool))
    } else {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        crate::migrations::run_postgres(&pool).await?;
        Arc::new(PostgresStore::new(pool))
    };
    info!("Migrations completed");

    store.health_check().await?;
    Ok(store)
}

/// Finished-on stamp for a history status: set for terminal statuses only.
pub(crate) fn finished_on_for(status: HistoryStatus) -> Option<DateTime<Utc>> {
    status.is_terminal().then(Utc::now)
}

/// Map a store miss onto the collaborator contract.
pub(crate) fn not_found_app(name: &str) -> crate::collaborators::CollaboratorError {
    crate::collaborators::CollaboratorError::NotFound(format!("app {}", name))
}

pub(crate) fn transport(e: sqlx::Error) -> crate::collaborators::CollaboratorError {
    crate::collaborators::CollaboratorError::Transport(e.to_string())
}
