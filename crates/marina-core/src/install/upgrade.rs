// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Upgrade an installed app to new values or a new chart version.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::persistence::{HistoryRecord, NewHistory, NewInstalledAppVersion};

use super::{HistoryStatus, InstallError, InstallService, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInstalledAppRequest {
    pub installed_app_id: i64,
    pub app_store_version_id: i64,
    #[serde(default)]
    pub values_override_yaml: String,
    #[serde(default)]
    pub reference_value_id: Option<i64>,
    #[serde(default)]
    pub reference_value_kind: Option<String>,
    pub user_id: i64,
}

impl InstallService {
    /// Supersede the active version, push the new values and finalise a
    /// fresh history row, which is returned.
    pub async fn update_installed_app(
        &self,
        request: &UpdateInstalledAppRequest,
        cancel: &CancellationToken,
    ) -> Result<HistoryRecord> {
        let installed = self
            .store
            .get_installed_app(request.installed_app_id)
            .await?
            .filter(|i| i.active)
            .ok_or_else(|| {
                InstallError::NotFound(format!(
                    "installed app {} not found",
                    request.installed_app_id
                ))
            })?;
        let previous = self
            .store
            .active_installed_app_version(installed.id)
            .await?;
        let version_changed = previous.as_ref().map(|p| p.app_store_application_version_id)
            != Some(request.app_store_version_id);

        let app_store_version = self
            .collaborators
            .app_store
            .find_version(request.app_store_version_id)
            .await?;
        let values = if request.values_override_yaml.trim().is_empty() {
            app_store_version.default_values.clone()
        } else {
            request.values_override_yaml.clone()
        };
        super::request::values_document(&app_store_version.chart_name, &values)?;

        let mut tx = self.store.begin().await?;
        let version = tx
            .insert_installed_app_version(&NewInstalledAppVersion {
                installed_app_id: installed.id,
                app_store_application_version_id: request.app_store_version_id,
                values_yaml: values.clone(),
                reference_value_id: request.reference_value_id,
                reference_value_kind: request.reference_value_kind.clone(),
                created_by: request.user_id,
            })
            .await?;
        let history = tx
            .insert_history(&NewHistory {
                installed_app_version_id: version.id,
                values_yaml_raw: values,
                git_hash: None,
                status: HistoryStatus::InProgress,
                helm_release_status_config: None,
                created_by: request.user_id,
            })
            .await?;
        tx.commit().await?;

        let mut dto = self.rebuild_dto(&version, history.id).await?;
        dto.user_id = request.user_id;
        let outcome = self.redeploy(&dto, version_changed, cancel).await;
        let status = if outcome.is_ok() {
            HistoryStatus::Succeeded
        } else {
            HistoryStatus::Failed
        };
        self.finalize(history.id, status).await?;
        outcome?;

        info!(
            installed_app_id = installed.id,
            installed_app_version_id = version.id,
            version_changed,
            "Installed app upgraded"
        );
        self.store
            .get_history(history.id)
            .await?
            .ok_or_else(|| InstallError::NotFound(format!("history {} not found", history.id)))
    }
}
