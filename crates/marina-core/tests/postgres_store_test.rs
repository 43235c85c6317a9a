// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL install store tests.
//!
//! These run against a live database named by TEST_MARINA_DATABASE_URL and
//! are skipped when it is not set. Every test uses its own app names so
//! runs can share one database.

mod common;

use std::sync::Arc;

use common::*;
use marina_core::collaborators::{AppRepository, MockCollaborators};
use marina_core::install::{HistoryStatus, InstallService, InstallSettings, InstallStatus};
use marina_core::migrations;
use marina_core::persistence::{
    InstallStore, NewApp, NewChartGroupDeployment, NewHistory, NewInstalledApp,
    NewInstalledAppVersion, PostgresStore,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Skip test if database URL is not set
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_MARINA_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_MARINA_DATABASE_URL not set");
            return;
        }
    };
}

async fn get_store() -> Option<PostgresStore> {
    let database_url = std::env::var("TEST_MARINA_DATABASE_URL").ok()?;
    let pool = sqlx::PgPool::connect(&database_url).await.ok()?;
    migrations::run_postgres(&pool)
        .await
        .expect("Failed to run PostgreSQL migrations");
    Some(PostgresStore::new(pool))
}

fn unique_name(prefix: &str) -> String {
    format!("{}-{}", prefix, &Uuid::new_v4().simple().to_string()[..8])
}

/// Insert an app, an installed app in DEPLOY_INIT and its first version.
async fn seed(store: &PostgresStore, app_name: &str) -> (i64, i64, i64) {
    let mut tx = store.begin().await.expect("Failed to begin");
    let app = tx
        .insert_app(&NewApp {
            app_name: app_name.to_string(),
            team_id: Some(1),
            created_by: 7,
        })
        .await
        .expect("Failed to insert app");
    let installed = tx
        .insert_installed_app(&NewInstalledApp {
            app_id: app.id,
            environment_id: 3,
            status: InstallStatus::DeployInit,
            deployment_app_type: "argo_cd".into(),
            git_ops_repo_name: Some(app_name.to_string()),
            created_by: 7,
        })
        .await
        .expect("Failed to insert installed app");
    let version = tx
        .insert_installed_app_version(&NewInstalledAppVersion {
            installed_app_id: installed.id,
            app_store_application_version_id: 11,
            values_yaml: "{}".into(),
            reference_value_id: None,
            reference_value_kind: None,
            created_by: 7,
        })
        .await
        .expect("Failed to insert version");
    tx.commit().await.expect("Failed to commit");
    (app.id, installed.id, version.id)
}

fn history(version_id: i64, status: HistoryStatus) -> NewHistory {
    NewHistory {
        installed_app_version_id: version_id,
        values_yaml_raw: "{}".into(),
        git_hash: None,
        status,
        helm_release_status_config: None,
        created_by: 7,
    }
}

#[tokio::test]
async fn test_insert_and_get_installed_app() {
    skip_if_no_db!();
    let Some(store) = get_store().await else {
        return;
    };
    let name = unique_name("redis");
    let (app_id, installed_id, version_id) = seed(&store, &name).await;

    assert_eq!(store.get_app(app_id).await.unwrap().unwrap().app_name, name);
    let loaded = store.get_installed_app(installed_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, "DEPLOY_INIT");
    assert!(loaded.active);
    let active = store
        .active_installed_app_version(installed_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.id, version_id);
}

#[tokio::test]
async fn test_status_guard() {
    skip_if_no_db!();
    let Some(store) = get_store().await else {
        return;
    };
    let (_, installed_id, _) = seed(&store, &unique_name("redis")).await;

    assert!(!store.update_status(installed_id, InstallStatus::AcdSuccess).await.unwrap());
    assert!(store.update_status(installed_id, InstallStatus::GitSuccess).await.unwrap());
    assert!(store.update_status(installed_id, InstallStatus::AcdSuccess).await.unwrap());
    assert!(store.update_status(installed_id, InstallStatus::DeploySuccess).await.unwrap());
    assert!(!store.update_status(installed_id, InstallStatus::GitError).await.unwrap());
    assert!(!store.update_status(installed_id, InstallStatus::WfUnknown).await.unwrap());

    let loaded = store.get_installed_app(installed_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, "DEPLOY_SUCCESS");
}

#[tokio::test]
async fn test_new_version_supersedes_active() {
    skip_if_no_db!();
    let Some(store) = get_store().await else {
        return;
    };
    let (_, installed_id, first_id) = seed(&store, &unique_name("redis")).await;

    let mut tx = store.begin().await.unwrap();
    let second = tx
        .insert_installed_app_version(&NewInstalledAppVersion {
            installed_app_id: installed_id,
            app_store_application_version_id: 12,
            values_yaml: "{\"a\":1}".into(),
            reference_value_id: None,
            reference_value_kind: None,
            created_by: 7,
        })
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert!(!store.get_installed_app_version(first_id).await.unwrap().unwrap().active);
    let active = store
        .active_installed_app_version(installed_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.id, second.id);
}

#[tokio::test]
async fn test_history_finalize_once() {
    skip_if_no_db!();
    let Some(store) = get_store().await else {
        return;
    };
    let (_, installed_id, version_id) = seed(&store, &unique_name("redis")).await;

    let row = store
        .append_history(&history(version_id, HistoryStatus::InProgress))
        .await
        .unwrap();
    store.record_git_hash(row.id, "abc123").await.unwrap();
    assert!(store.finalize_history(row.id, HistoryStatus::Succeeded).await.unwrap());
    assert!(!store.finalize_history(row.id, HistoryStatus::Failed).await.unwrap());

    let rows = store.list_history_for_installed_app(installed_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "Succeeded");
    assert_eq!(rows[0].git_hash.as_deref(), Some("abc123"));
    assert!(rows[0].finished_on.is_some());
}

#[tokio::test]
async fn test_rollback_discards_app() {
    skip_if_no_db!();
    let Some(store) = get_store().await else {
        return;
    };
    let name = unique_name("ghost");

    let mut tx = store.begin().await.unwrap();
    tx.insert_app(&NewApp {
        app_name: name.clone(),
        team_id: None,
        created_by: 1,
    })
    .await
    .unwrap();
    tx.rollback().await.unwrap();

    assert!(store.find_active_by_name(&name).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_chart_group_deployments() {
    skip_if_no_db!();
    let Some(store) = get_store().await else {
        return;
    };
    let (_, installed_id, _) = seed(&store, &unique_name("redis")).await;
    let group = unique_name("group");

    let mut tx = store.begin().await.unwrap();
    tx.insert_chart_group_deployment(&NewChartGroupDeployment {
        chart_group_id: 5,
        chart_group_entry_id: None,
        installed_app_id: installed_id,
        group_installation_id: group.clone(),
        created_by: 7,
    })
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let rows = store.list_chart_group_deployments(&group).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].installed_app_id, installed_id);
    assert!(!rows[0].deleted);
    store.health_check().await.unwrap();
}

#[tokio::test]
async fn test_argo_install_end_to_end() {
    skip_if_no_db!();
    let Some(store) = get_store().await else {
        return;
    };
    let store = Arc::new(store);
    let git_root = tempfile::tempdir().unwrap();
    let mocks = MockCollaborators::new(git_root.path());
    mocks.environments.add_cluster(CLUSTER_ID, "default_cluster").await;
    let environment = mocks.environments.add("dev", "dev-ns", CLUSTER_ID).await;
    mocks
        .app_store
        .add_version(redis_version(REDIS_VERSION_ID, "17.3.0"))
        .await;
    mocks.users.add(USER_ID, USER_EMAIL, true).await;
    let service = InstallService::new(
        store.clone(),
        mocks.collaborators(),
        InstallSettings::default(),
    );

    let name = unique_name("redis");
    let request = marina_core::install::InstallAppVersionRequest {
        app_name: name.clone(),
        app_store_version_id: REDIS_VERSION_ID,
        environment_id: Some(environment.id),
        cluster_id: 0,
        namespace: String::new(),
        values_override_yaml: REDIS_VALUES.to_string(),
        reference_value_id: None,
        reference_value_kind: None,
        user_id: USER_ID,
        team_id: Some(1),
        deployment_app_type: None,
        chart_group_entry_id: None,
    };
    let dto = service
        .install_app(&request, &CancellationToken::new())
        .await
        .unwrap();

    let installed = store.get_installed_app(dto.installed_app_id).await.unwrap().unwrap();
    assert_eq!(installed.status, InstallStatus::DeploySuccess.as_str());
    let rows = store
        .list_history_for_installed_app(dto.installed_app_id)
        .await
        .unwrap();
    assert!(rows.iter().all(|r| r.status == "Succeeded"));
    assert!(mocks.argo.syncs.lock().await.contains(&format!("{}-dev", name)));
}
