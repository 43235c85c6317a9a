// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed install store.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::collaborators::{AppRecord, AppRepository, CollaboratorResult};
use crate::install::status::{HistoryStatus, InstallStatus};

use super::{
    ChartGroupDeploymentRecord, HistoryRecord, InstallStore, InstallTxn, InstalledAppRecord,
    InstalledAppVersionRecord, NewApp, NewChartGroupDeployment, NewHistory, NewInstalledApp,
    NewInstalledAppVersion, StoreResult, finished_on_for, not_found_app, transport,
};

/// SQLite-backed install store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing pool. Migrations must already have run.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn update_status_with<'e, E>(
    executor: E,
    installed_app_id: i64,
    to: InstallStatus,
) -> StoreResult<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let allowed = to.predecessor_strs();
    if allowed.is_empty() {
        return Ok(false);
    }
    let placeholders = vec!["?"; allowed.len()].join(", ");
    let sql = format!(
        "UPDATE installed_apps SET status = ?, updated_on = ? WHERE id = ? AND status IN ({})",
        placeholders
    );
    let mut query = sqlx::query(&sql)
        .bind(to.as_str())
        .bind(Utc::now())
        .bind(installed_app_id);
    for status in allowed {
        query = query.bind(status);
    }
    let result = query.execute(executor).await?;
    Ok(result.rows_affected() > 0)
}

async fn active_apps_by_name<'e, E>(executor: E, name: &str) -> StoreResult<Vec<AppRecord>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, AppRecord>(
        r#"
        SELECT id, app_name, active, app_store, team_id, created_by
        FROM apps
        WHERE app_name = ? AND active = 1
        ORDER BY id ASC
        "#,
    )
    .bind(name)
    .fetch_all(executor)
    .await
}

/// An open SQLite transaction.
pub struct SqliteTxn {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl InstallTxn for SqliteTxn {
    async fn find_active_apps_by_name(&mut self, name: &str) -> StoreResult<Vec<AppRecord>> {
        active_apps_by_name(&mut *self.tx, name).await
    }

    async fn insert_app(&mut self, app: &NewApp) -> StoreResult<AppRecord> {
        let now = Utc::now();
        sqlx::query_as::<_, AppRecord>(
            r#"
            INSERT INTO apps (app_name, active, app_store, team_id, created_by, created_on, updated_on)
            VALUES (?, 1, 1, ?, ?, ?, ?)
            RETURNING id, app_name, active, app_store, team_id, created_by
            "#,
        )
        .bind(&app.app_name)
        .bind(app.team_id)
        .bind(app.created_by)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await
    }

    async fn update_app(&mut self, app: &AppRecord) -> StoreResult<()> {
        sqlx::query("UPDATE apps SET active = ?, team_id = ?, updated_on = ? WHERE id = ?")
            .bind(app.active)
            .bind(app.team_id)
            .bind(Utc::now())
            .bind(app.id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_installed_app(
        &mut self,
        installed_app: &NewInstalledApp,
    ) -> StoreResult<InstalledAppRecord> {
        let now = Utc::now();
        sqlx::query_as::<_, InstalledAppRecord>(
            r#"
            INSERT INTO installed_apps
                (app_id, environment_id, status, deployment_app_type, git_ops_repo_name,
                 active, created_by, created_on, updated_on)
            VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)
            RETURNING id, app_id, environment_id, status, deployment_app_type,
                      git_ops_repo_name, active, created_by, created_on, updated_on
            "#,
        )
        .bind(installed_app.app_id)
        .bind(installed_app.environment_id)
        .bind(installed_app.status.as_str())
        .bind(&installed_app.deployment_app_type)
        .bind(&installed_app.git_ops_repo_name)
        .bind(installed_app.created_by)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await
    }

    async fn insert_installed_app_version(
        &mut self,
        version: &NewInstalledAppVersion,
    ) -> StoreResult<InstalledAppVersionRecord> {
        let superseded = sqlx::query(
            "UPDATE installed_app_versions SET active = 0 WHERE installed_app_id = ? AND active = 1",
        )
        .bind(version.installed_app_id)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();
        if superseded > 0 {
            debug!(installed_app_id = version.installed_app_id, superseded, "Superseded active versions");
        }

        sqlx::query_as::<_, InstalledAppVersionRecord>(
            r#"
            INSERT INTO installed_app_versions
                (installed_app_id, app_store_application_version_id, values_yaml, active,
                 reference_value_id, reference_value_kind, created_by, created_on)
            VALUES (?, ?, ?, 1, ?, ?, ?, ?)
            RETURNING id, installed_app_id, app_store_application_version_id, values_yaml, active,
                      reference_value_id, reference_value_kind, created_by, created_on
            "#,
        )
        .bind(version.installed_app_id)
        .bind(version.app_store_application_version_id)
        .bind(&version.values_yaml)
        .bind(version.reference_value_id)
        .bind(&version.reference_value_kind)
        .bind(version.created_by)
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await
    }

    async fn insert_history(&mut self, history: &NewHistory) -> StoreResult<HistoryRecord> {
        insert_history_with(&mut *self.tx, history).await
    }

    async fn insert_chart_group_deployment(
        &mut self,
        deployment: &NewChartGroupDeployment,
    ) -> StoreResult<ChartGroupDeploymentRecord> {
        sqlx::query_as::<_, ChartGroupDeploymentRecord>(
            r#"
            INSERT INTO chart_group_deployments
                (chart_group_id, chart_group_entry_id, installed_app_id, group_installation_id,
                 deleted, created_by, created_on)
            VALUES (?, ?, ?, ?, 0, ?, ?)
            RETURNING id, chart_group_id, chart_group_entry_id, installed_app_id,
                      group_installation_id, deleted, created_by
            "#,
        )
        .bind(deployment.chart_group_id)
        .bind(deployment.chart_group_entry_id)
        .bind(deployment.installed_app_id)
        .bind(&deployment.group_installation_id)
        .bind(deployment.created_by)
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await
    }

    async fn deactivate_installed_app(&mut self, installed_app_id: i64) -> StoreResult<bool> {
        let changed = sqlx::query(
            "UPDATE installed_apps SET active = 0, updated_on = ? WHERE id = ? AND active = 1",
        )
        .bind(Utc::now())
        .bind(installed_app_id)
        .execute(&mut *self.tx)
        .await?
        .rows_affected()
            > 0;

        sqlx::query("UPDATE installed_app_versions SET active = 0 WHERE installed_app_id = ?")
            .bind(installed_app_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(changed)
    }

    async fn update_status(
        &mut self,
        installed_app_id: i64,
        to: InstallStatus,
    ) -> StoreResult<bool> {
        update_status_with(&mut *self.tx, installed_app_id, to).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await
    }
}

async fn insert_history_with<'e, E>(executor: E, history: &NewHistory) -> StoreResult<HistoryRecord>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, HistoryRecord>(
        r#"
        INSERT INTO installed_app_version_history
            (installed_app_version_id, values_yaml_raw, git_hash, status, started_on,
             finished_on, helm_release_status_config, created_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id, installed_app_version_id, values_yaml_raw, git_hash, status, started_on,
                  finished_on, helm_release_status_config, created_by
        "#,
    )
    .bind(history.installed_app_version_id)
    .bind(&history.values_yaml_raw)
    .bind(&history.git_hash)
    .bind(history.status.as_str())
    .bind(Utc::now())
    .bind(finished_on_for(history.status))
    .bind(&history.helm_release_status_config)
    .bind(history.created_by)
    .fetch_one(executor)
    .await
}

#[async_trait]
impl InstallStore for SqliteStore {
    async fn begin(&self) -> StoreResult<Box<dyn InstallTxn>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTxn { tx }))
    }

    async fn get_app(&self, app_id: i64) -> StoreResult<Option<AppRecord>> {
        sqlx::query_as::<_, AppRecord>(
            "SELECT id, app_name, active, app_store, team_id, created_by FROM apps WHERE id = ?",
        )
        .bind(app_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_installed_app(
        &self,
        installed_app_id: i64,
    ) -> StoreResult<Option<InstalledAppRecord>> {
        sqlx::query_as::<_, InstalledAppRecord>(
            r#"
            SELECT id, app_id, environment_id, status, deployment_app_type, git_ops_repo_name,
                   active, created_by, created_on, updated_on
            FROM installed_apps
            WHERE id = ?
            "#,
        )
        .bind(installed_app_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_installed_app_version(
        &self,
        installed_app_version_id: i64,
    ) -> StoreResult<Option<InstalledAppVersionRecord>> {
        sqlx::query_as::<_, InstalledAppVersionRecord>(
            r#"
            SELECT id, installed_app_id, app_store_application_version_id, values_yaml, active,
                   reference_value_id, reference_value_kind, created_by, created_on
            FROM installed_app_versions
            WHERE id = ?
            "#,
        )
        .bind(installed_app_version_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn active_installed_app_version(
        &self,
        installed_app_id: i64,
    ) -> StoreResult<Option<InstalledAppVersionRecord>> {
        sqlx::query_as::<_, InstalledAppVersionRecord>(
            r#"
            SELECT id, installed_app_id, app_store_application_version_id, values_yaml, active,
                   reference_value_id, reference_value_kind, created_by, created_on
            FROM installed_app_versions
            WHERE installed_app_id = ? AND active = 1
            "#,
        )
        .bind(installed_app_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_history(&self, history_id: i64) -> StoreResult<Option<HistoryRecord>> {
        sqlx::query_as::<_, HistoryRecord>(
            r#"
            SELECT id, installed_app_version_id, values_yaml_raw, git_hash, status, started_on,
                   finished_on, helm_release_status_config, created_by
            FROM installed_app_version_history
            WHERE id = ?
            "#,
        )
        .bind(history_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn list_history_for_installed_app(
        &self,
        installed_app_id: i64,
    ) -> StoreResult<Vec<HistoryRecord>> {
        sqlx::query_as::<_, HistoryRecord>(
            r#"
            SELECT h.id, h.installed_app_version_id, h.values_yaml_raw, h.git_hash, h.status,
                   h.started_on, h.finished_on, h.helm_release_status_config, h.created_by
            FROM installed_app_version_history h
            JOIN installed_app_versions v ON v.id = h.installed_app_version_id
            WHERE v.installed_app_id = ?
            ORDER BY h.id ASC
            "#,
        )
        .bind(installed_app_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn update_status(&self, installed_app_id: i64, to: InstallStatus) -> StoreResult<bool> {
        update_status_with(&self.pool, installed_app_id, to).await
    }

    async fn record_git_hash(&self, history_id: i64, git_hash: &str) -> StoreResult<()> {
        sqlx::query("UPDATE installed_app_version_history SET git_hash = ? WHERE id = ?")
            .bind(git_hash)
            .bind(history_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn finalize_history(&self, history_id: i64, status: HistoryStatus) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE installed_app_version_history
            SET status = ?, finished_on = ?
            WHERE id = ? AND status IN ('Unknown', 'InProgress')
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(history_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_history(&self, history: &NewHistory) -> StoreResult<HistoryRecord> {
        insert_history_with(&self.pool, history).await
    }

    async fn list_chart_group_deployments(
        &self,
        group_installation_id: &str,
    ) -> StoreResult<Vec<ChartGroupDeploymentRecord>> {
        sqlx::query_as::<_, ChartGroupDeploymentRecord>(
            r#"
            SELECT id, chart_group_id, chart_group_entry_id, installed_app_id,
                   group_installation_id, deleted, created_by
            FROM chart_group_deployments
            WHERE group_installation_id = ? AND deleted = 0
            ORDER BY id ASC
            "#,
        )
        .bind(group_installation_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl AppRepository for SqliteStore {
    async fn find_active_by_name(&self, name: &str) -> CollaboratorResult<AppRecord> {
        active_apps_by_name(&self.pool, name)
            .await
            .map_err(transport)?
            .into_iter()
            .next()
            .ok_or_else(|| not_found_app(name))
    }

    async fn find_active_list_by_name(&self, name: &str) -> CollaboratorResult<Vec<AppRecord>> {
        active_apps_by_name(&self.pool, name)
            .await
            .map_err(transport)
    }
}
