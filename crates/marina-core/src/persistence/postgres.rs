// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed install store.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use crate::collaborators::{AppRecord, AppRepository, CollaboratorResult};
use crate::install::status::{HistoryStatus, InstallStatus};

use super::{
    ChartGroupDeploymentRecord, HistoryRecord, InstallStore, InstallTxn, InstalledAppRecord,
    InstalledAppVersionRecord, NewApp, NewChartGroupDeployment, NewHistory, NewInstalledApp,
    NewInstalledAppVersion, StoreResult, finished_on_for, not_found_app, transport,
};

/// PostgreSQL-backed install store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wrap an existing pool. Migrations must already have run.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn update_status_with<'e, E>(
    executor: E,
    installed_app_id: i64,
    to: InstallStatus,
) -> StoreResult<bool>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let allowed: Vec<String> = to
        .predecessor_strs()
        .into_iter()
        .map(str::to_string)
        .collect();
    if allowed.is_empty() {
        return Ok(false);
    }
    let result = sqlx::query(
        r#"
        UPDATE installed_apps
        SET status = $1, updated_on = NOW()
        WHERE id = $2 AND status = ANY($3)
        "#,
    )
    .bind(to.as_str())
    .bind(installed_app_id)
    .bind(allowed)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn active_apps_by_name<'e, E>(executor: E, name: &str) -> StoreResult<Vec<AppRecord>>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, AppRecord>(
        r#"
        SELECT id, app_name, active, app_store, team_id, created_by
        FROM apps
        WHERE app_name = $1 AND active
        ORDER BY id ASC
        "#,
    )
    .bind(name)
    .fetch_all(executor)
    .await
}

async fn insert_history_with<'e, E>(executor: E, history: &NewHistory) -> StoreResult<HistoryRecord>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, HistoryRecord>(
        r#"
        INSERT INTO installed_app_version_history
            (installed_app_version_id, values_yaml_raw, git_hash, status, started_on,
             finished_on, helm_release_status_config, created_by)
        VALUES ($1, $2, $3, $4, NOW(), $5, $6, $7)
        RETURNING id, installed_app_version_id, values_yaml_raw, git_hash, status, started_on,
                  finished_on, helm_release_status_config, created_by
        "#,
    )
    .bind(history.installed_app_version_id)
    .bind(&history.values_yaml_raw)
    .bind(&history.git_hash)
    .bind(history.status.as_str())
    .bind(finished_on_for(history.status))
    .bind(&history.helm_release_status_config)
    .bind(history.created_by)
    .fetch_one(executor)
    .await
}

/// An open PostgreSQL transaction.
pub struct PostgresTxn {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl InstallTxn for PostgresTxn {
    async fn find_active_apps_by_name(&mut self, name: &str) -> StoreResult<Vec<AppRecord>> {
        active_apps_by_name(&mut *self.tx, name).await
    }

    async fn insert_app(&mut self, app: &NewApp) -> StoreResult<AppRecord> {
        sqlx::query_as::<_, AppRecord>(
            r#"
            INSERT INTO apps (app_name, active, app_store, team_id, created_by)
            VALUES ($1, TRUE, TRUE, $2, $3)
            RETURNING id, app_name, active, app_store, team_id, created_by
            "#,
        )
        .bind(&app.app_name)
        .bind(app.team_id)
        .bind(app.created_by)
        .fetch_one(&mut *self.tx)
        .await
    }

    async fn update_app(&mut self, app: &AppRecord) -> StoreResult<()> {
        sqlx::query("UPDATE apps SET active = $1, team_id = $2, updated_on = NOW() WHERE id = $3")
            .bind(app.active)
            .bind(app.team_id)
            .bind(app.id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_installed_app(
        &mut self,
        installed_app: &NewInstalledApp,
    ) -> StoreResult<InstalledAppRecord> {
        sqlx::query_as::<_, InstalledAppRecord>(
            r#"
            INSERT INTO installed_apps
                (app_id, environment_id, status, deployment_app_type, git_ops_repo_name, created_by)
            VALUES ($1, $2, $3, $4, $5, $6)
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
        .fetch_one(&mut *self.tx)
        .await
    }

    async fn insert_installed_app_version(
        &mut self,
        version: &NewInstalledAppVersion,
    ) -> StoreResult<InstalledAppVersionRecord> {
        let superseded = sqlx::query(
            "UPDATE installed_app_versions SET active = FALSE WHERE installed_app_id = $1 AND active",
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
                (installed_app_id, app_store_application_version_id, values_yaml,
                 reference_value_id, reference_value_kind, created_by)
            VALUES ($1, $2, $3, $4, $5, $6)
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
                 created_by)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, chart_group_id, chart_group_entry_id, installed_app_id,
                      group_installation_id, deleted, created_by
            "#,
        )
        .bind(deployment.chart_group_id)
        .bind(deployment.chart_group_entry_id)
        .bind(deployment.installed_app_id)
        .bind(&deployment.group_installation_id)
        .bind(deployment.created_by)
        .fetch_one(&mut *self.tx)
        .await
    }

    async fn deactivate_installed_app(&mut self, installed_app_id: i64) -> StoreResult<bool> {
        let changed = sqlx::query(
            "UPDATE installed_apps SET active = FALSE, updated_on = NOW() WHERE id = $1 AND active",
        )
        .bind(installed_app_id)
        .execute(&mut *self.tx)
        .await?
        .rows_affected()
            > 0;

        sqlx::query("UPDATE installed_app_versions SET active = FALSE WHERE installed_app_id = $1")
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

#[async_trait]
impl InstallStore for PostgresStore {
    async fn begin(&self) -> StoreResult<Box<dyn InstallTxn>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTxn { tx }))
    }

    async fn get_app(&self, app_id: i64) -> StoreResult<Option<AppRecord>> {
        sqlx::query_as::<_, AppRecord>(
            "SELECT id, app_name, active, app_store, team_id, created_by FROM apps WHERE id = $1",
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
            WHERE id = $1
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
            WHERE id = $1
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
            WHERE installed_app_id = $1 AND active
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
            WHERE id = $1
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
            WHERE v.installed_app_id = $1
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
        sqlx::query("UPDATE installed_app_version_history SET git_hash = $1 WHERE id = $2")
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
            SET status = $1, finished_on = NOW()
            WHERE id = $2 AND status IN ('Unknown', 'InProgress')
            "#,
        )
        .bind(status.as_str())
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
            WHERE group_installation_id = $1 AND NOT deleted
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
impl AppRepository for PostgresStore {
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
