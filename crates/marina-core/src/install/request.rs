// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Install requests and the DB-phase result.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::collaborators::{AppStoreVersion, Environment};

use super::{DeploymentAppType, InstallError, Result};

/// Reference kind whose values come from the chart's defaults.
pub const REFERENCE_KIND_DEFAULT: &str = "DEFAULT";

/// A request to install one app-store chart version into an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallAppVersionRequest {
    pub app_name: String,
    pub app_store_version_id: i64,
    /// Target environment; in hyperion mode the environment is derived
    /// from `cluster_id` and `namespace` instead.
    #[serde(default)]
    pub environment_id: Option<i64>,
    #[serde(default)]
    pub cluster_id: i64,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub values_override_yaml: String,
    #[serde(default)]
    pub reference_value_id: Option<i64>,
    #[serde(default)]
    pub reference_value_kind: Option<String>,
    pub user_id: i64,
    #[serde(default)]
    pub team_id: Option<i64>,
    /// Caller-selected deployment type.
    #[serde(default)]
    pub deployment_app_type: Option<DeploymentAppType>,
    #[serde(default)]
    pub chart_group_entry_id: Option<i64>,
}

/// Everything later phases need, produced by the DB phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallAppVersionDto {
    pub app_id: i64,
    pub app_name: String,
    pub installed_app_id: i64,
    pub installed_app_version_id: i64,
    pub installed_app_version_history_id: i64,
    pub environment: Environment,
    pub app_store_version: AppStoreVersion,
    pub values_override_yaml: String,
    pub deployment_app_type: DeploymentAppType,
    pub git_ops_repo_name: Option<String>,
    pub user_id: i64,
    pub chart_group_entry_id: Option<i64>,
}

impl InstallAppVersionDto {
    /// `<app>-<env>`: release, application and chart directory name.
    pub fn release_name(&self) -> String {
        Self::release_name_for(&self.app_name, &self.environment.name)
    }

    pub fn release_name_for(app_name: &str, environment_name: &str) -> String {
        format!("{}-{}", app_name, environment_name)
    }

    /// Gitops repository name, defaulting to the app name.
    pub fn repo_name(&self) -> &str {
        self.git_ops_repo_name.as_deref().unwrap_or(&self.app_name)
    }

    /// `release-<appStoreVersionId>-env-<envId>`
    pub fn release_message(&self) -> String {
        format!(
            "release-{}-env-{}",
            self.app_store_version.id, self.environment.id
        )
    }
}

/// `requirements.yaml`: a single dependency on the source chart.
pub fn requirements_document(version: &AppStoreVersion) -> Result<String> {
    let document = json!({
        "dependencies": [{
            "name": version.chart_name,
            "version": version.version,
            "repository": version.repository_url,
        }]
    });
    Ok(serde_json::to_string_pretty(&document)?)
}

/// `values.yaml`: the caller's values under the chart name. Blank values
/// become an empty mapping.
pub fn values_document(chart_name: &str, values_override: &str) -> Result<String> {
    let values: Value = if values_override.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(values_override).map_err(|e| {
            InstallError::bad_request(
                format!("values override is not a valid document: {}", e),
                "values override must be a JSON (YAML flow) mapping",
            )
        })?
    };
    let mut document = serde_json::Map::new();
    document.insert(chart_name.to_string(), values);
    Ok(serde_json::to_string_pretty(&Value::Object(document))?)
}
