// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Delete an installed app.
//!
//! The installed app and its versions are deactivated in one transaction,
//! then the release is removed from wherever it lives. A failed remote
//! delete rolls the transaction back unless the caller forces the delete.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{DeploymentAppType, InstallAppVersionDto, InstallError, InstallService, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteInstalledAppRequest {
    pub installed_app_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub force_delete: bool,
}

impl InstallService {
    pub async fn delete_installed_app(&self, request: &DeleteInstalledAppRequest) -> Result<()> {
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
        let app = self
            .store
            .get_app(installed.app_id)
            .await?
            .ok_or_else(|| InstallError::NotFound(format!("app {} not found", installed.app_id)))?;
        let environment = self
            .collaborators
            .environments
            .find_by_id(installed.environment_id)
            .await?;
        let deployment_app_type: DeploymentAppType = installed.deployment_app_type.parse()?;
        let release_name = InstallAppVersionDto::release_name_for(&app.app_name, &environment.name);

        // Every read happens before the transaction opens.
        let mut tx = self.store.begin().await?;
        if !tx.deactivate_installed_app(installed.id).await? {
            tx.rollback().await?;
            return Err(InstallError::NotFound(format!(
                "installed app {} not found",
                installed.id
            )));
        }

        let remote = match deployment_app_type {
            DeploymentAppType::Helm => {
                self.delete_helm_release(environment.cluster_id, &release_name, &environment.namespace)
                    .await
            }
            DeploymentAppType::ArgoCd => self.delete_argo_application(&release_name).await,
            DeploymentAppType::ManifestDownload => Ok(()),
        };

        match remote {
            Ok(()) => {}
            Err(e) if request.force_delete => {
                warn!(
                    installed_app_id = installed.id,
                    release = %release_name,
                    error = %e,
                    "Remote delete failed, continuing with force delete"
                );
            }
            Err(e) => {
                tx.rollback().await?;
                warn!(installed_app_id = installed.id, error = %e, "Remote delete failed, rolled back");
                return Err(e);
            }
        }

        tx.commit().await?;
        info!(
            installed_app_id = installed.id,
            release = %release_name,
            deployment_app_type = deployment_app_type.as_str(),
            user_id = request.user_id,
            "Installed app deleted"
        );
        Ok(())
    }

    async fn delete_helm_release(
        &self,
        cluster_id: i64,
        release_name: &str,
        namespace: &str,
    ) -> Result<()> {
        let helm = &self.collaborators.helm;
        let installed = helm
            .is_release_installed(cluster_id, release_name, namespace)
            .await
            .map_err(InstallError::Helm)?;
        if !installed {
            info!(release = %release_name, "Release not installed, nothing to delete");
            return Ok(());
        }
        match helm.delete_application(cluster_id, release_name, namespace).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(InstallError::Helm(e)),
        }
    }

    async fn delete_argo_application(&self, release_name: &str) -> Result<()> {
        match self.collaborators.argo.delete(release_name, true).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Err(InstallError::Acd(
                "Could not delete as application not found in argocd".to_string(),
            )),
            Err(e) => {
                warn!(application = %release_name, error = %e, "Argo delete failed");
                Err(InstallError::Acd("Could not delete application".to_string()))
            }
        }
    }
}
