// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for marina-core integration tests.
//!
//! Provides a TestContext wiring every collaborator to its in-memory mock,
//! an in-memory SQLite install store and a temporary git working directory.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use marina_core::collaborators::{AppStoreVersion, Environment, MockCollaborators};
use marina_core::dispatch::ActionContext;
use marina_core::install::{
    InstallAppVersionRequest, InstallService, InstallSettings, InstallStatus,
};
use marina_core::migrations;
use marina_core::persistence::{InstallStore, SqliteStore};

pub const USER_ID: i64 = 1;
pub const USER_EMAIL: &str = "admin@example.com";
pub const CLUSTER_ID: i64 = 1;
pub const REDIS_VERSION_ID: i64 = 10;
pub const REDIS_NEXT_VERSION_ID: i64 = 11;
pub const REDIS_VALUES: &str = r#"{"architecture":"replication","replica":{"replicaCount":2}}"#;

/// Test context with mocks, a SQLite store and an install service.
pub struct TestContext {
    pub mocks: MockCollaborators,
    pub store: Arc<SqliteStore>,
    pub service: InstallService,
    pub environment: Environment,
    git_root: tempfile::TempDir,
}

impl TestContext {
    /// Context with default install settings.
    pub async fn new() -> Self {
        Self::with_settings(InstallSettings::default()).await
    }

    pub async fn with_settings(settings: InstallSettings) -> Self {
        let git_root = tempfile::tempdir().expect("Failed to create git working dir");

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to open SQLite pool");
        migrations::run_sqlite(&pool)
            .await
            .expect("Failed to run SQLite migrations");
        let store = Arc::new(SqliteStore::new(pool));

        let mocks = MockCollaborators::new(git_root.path());
        mocks.environments.add_cluster(CLUSTER_ID, "default_cluster").await;
        let environment = mocks.environments.add("dev", "dev-ns", CLUSTER_ID).await;
        mocks
            .app_store
            .add_version(redis_version(REDIS_VERSION_ID, "17.3.0"))
            .await;
        mocks
            .app_store
            .add_version(redis_version(REDIS_NEXT_VERSION_ID, "17.4.0"))
            .await;
        mocks.users.add(USER_ID, USER_EMAIL, true).await;

        let service = InstallService::new(store.clone(), mocks.collaborators(), settings);

        Self {
            mocks,
            store,
            service,
            environment,
            git_root,
        }
    }

    /// Settings with a short ACD timeout.
    pub fn short_acd_timeout() -> InstallSettings {
        InstallSettings {
            acd_timeout: Duration::from_millis(50),
            ..InstallSettings::default()
        }
    }

    pub fn git_root(&self) -> &std::path::Path {
        self.git_root.path()
    }

    /// Dispatcher context acting as the test user.
    pub fn action_context(&self) -> ActionContext {
        ActionContext::new(self.mocks.collaborators(), USER_ID)
    }

    /// Install request for `app_name` into the dev environment.
    pub fn install_request(&self, app_name: &str) -> InstallAppVersionRequest {
        InstallAppVersionRequest {
            app_name: app_name.to_string(),
            app_store_version_id: REDIS_VERSION_ID,
            environment_id: Some(self.environment.id),
            cluster_id: 0,
            namespace: String::new(),
            values_override_yaml: REDIS_VALUES.to_string(),
            reference_value_id: None,
            reference_value_kind: None,
            user_id: USER_ID,
            team_id: Some(1),
            deployment_app_type: None,
            chart_group_entry_id: None,
        }
    }

    /// Stored status of an installed app.
    pub async fn status(&self, installed_app_id: i64) -> InstallStatus {
        self.store
            .get_installed_app(installed_app_id)
            .await
            .expect("Failed to read installed app")
            .expect("Installed app not found")
            .status
            .parse()
            .expect("Unknown status")
    }
}

pub fn redis_version(id: i64, version: &str) -> AppStoreVersion {
    AppStoreVersion {
        id,
        chart_name: "redis".to_string(),
        version: version.to_string(),
        repository_url: "https://charts.bitnami.com/bitnami".to_string(),
        is_oci: false,
        default_values: r#"{"architecture":"standalone"}"#.to_string(),
    }
}
