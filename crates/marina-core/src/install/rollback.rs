// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Rollback to a previous deployment.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::persistence::{HistoryRecord, NewHistory, NewInstalledAppVersion};

use super::{
    DeploymentAppType, HistoryStatus, InstallAppVersionDto, InstallError, InstallService, Result,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequest {
    pub installed_app_id: i64,
    pub installed_app_version_history_id: i64,
    pub user_id: i64,
}

impl InstallService {
    /// Redeploy the version and values recorded on a history row. Appends a
    /// fresh history row and returns it in its final state.
    pub async fn rollback(
        &self,
        request: &RollbackRequest,
        cancel: &CancellationToken,
    ) -> Result<HistoryRecord> {
        let target = self
            .store
            .get_history(request.installed_app_version_history_id)
            .await?
            .ok_or_else(|| {
                InstallError::NotFound(format!(
                    "No deployment history version found for id: {}",
                    request.installed_app_version_history_id
                ))
            })?;
        let target_version = self
            .store
            .get_installed_app_version(target.installed_app_version_id)
            .await?
            .ok_or_else(|| {
                InstallError::NotFound(format!(
                    "No deployment history version found for id: {}",
                    request.installed_app_version_history_id
                ))
            })?;
        if target_version.installed_app_id != request.installed_app_id {
            return Err(InstallError::bad_request(
                "bad request, requested version are not belongs to each other",
                "bad request, requested version are not belongs to each other",
            ));
        }

        let active = self
            .store
            .active_installed_app_version(request.installed_app_id)
            .await?;
        let version_changed = active.as_ref().map(|a| a.app_store_application_version_id)
            != Some(target_version.app_store_application_version_id);

        // The rolled-back values become the active version.
        let mut tx = self.store.begin().await?;
        let version = tx
            .insert_installed_app_version(&NewInstalledAppVersion {
                installed_app_id: request.installed_app_id,
                app_store_application_version_id: target_version.app_store_application_version_id,
                values_yaml: target.values_yaml_raw.clone(),
                reference_value_id: target_version.reference_value_id,
                reference_value_kind: target_version.reference_value_kind.clone(),
                created_by: request.user_id,
            })
            .await?;
        let history = tx
            .insert_history(&NewHistory {
                installed_app_version_id: version.id,
                values_yaml_raw: target.values_yaml_raw.clone(),
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
            installed_app_id = request.installed_app_id,
            target_history_id = target.id,
            history_id = history.id,
            version_changed,
            "Rolled back"
        );
        self.store
            .get_history(history.id)
            .await?
            .ok_or_else(|| InstallError::NotFound(format!("history {} not found", history.id)))
    }

    /// Push changed values (and the dependency manifest when the chart
    /// version moved) to wherever the install lives.
    pub(crate) async fn redeploy(
        &self,
        dto: &InstallAppVersionDto,
        version_changed: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match dto.deployment_app_type {
            DeploymentAppType::ArgoCd => {
                let identity = self
                    .collaborators
                    .gitops
                    .gitops_config()
                    .await?
                    .ok_or_else(|| {
                        InstallError::bad_request(
                            "gitops configuration missing for argo_cd install",
                            "GitOps integration is not installed/configured.",
                        )
                    })?;
                let repo_url = self.collaborators.git.repo_url(dto.repo_name()).await?;
                let git_hash = self
                    .commit_release_files(dto, &identity, &repo_url, version_changed, cancel)
                    .await?;
                self.store
                    .record_git_hash(dto.installed_app_version_history_id, &git_hash)
                    .await?;
                self.sync_application(dto, cancel).await
            }
            DeploymentAppType::Helm => self
                .collaborators
                .helm
                .update_application_with_chart_info(
                    dto.environment.cluster_id,
                    self.release_request(dto),
                )
                .await
                .map_err(InstallError::Helm),
            DeploymentAppType::ManifestDownload => Ok(()),
        }
    }
}
