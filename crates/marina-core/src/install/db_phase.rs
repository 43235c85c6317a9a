// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! DB phase: every row an install needs, written inside the caller's
//! transaction before any external side effect.

use tracing::{info, warn};

use crate::collaborators::{AppRecord, Environment, NewEnvironment};
use crate::persistence::{InstallTxn, NewApp, NewHistory, NewInstalledApp, NewInstalledAppVersion};

use super::request::{REFERENCE_KIND_DEFAULT, values_document};
use super::{
    AppOfferingMode, DeploymentAppType, HistoryStatus, InstallAppVersionDto,
    InstallAppVersionRequest, InstallError, InstallService, InstallStatus, Result,
};

const GITOPS_MISSING_INTERNAL: &str = "argo_cd deployment requested but gitops is not configured";
const GITOPS_MISSING_USER: &str =
    "GitOps integration is not installed/configured. Please install/configure GitOps or use helm option.";

/// Inputs to deployment type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentTypeInputs {
    pub requested: Option<DeploymentAppType>,
    pub gitops_configured: bool,
    pub mode: AppOfferingMode,
    pub internal_use: bool,
    pub virtual_environment: bool,
    pub oci_repository: bool,
}

/// Pick how the install reaches the cluster.
pub fn select_deployment_app_type(inputs: DeploymentTypeInputs) -> Result<DeploymentAppType> {
    if inputs.requested == Some(DeploymentAppType::ArgoCd) && !inputs.gitops_configured {
        return Err(InstallError::bad_request(
            GITOPS_MISSING_INTERNAL,
            GITOPS_MISSING_USER,
        ));
    }
    if inputs.virtual_environment {
        return Ok(DeploymentAppType::ManifestDownload);
    }
    if !inputs.internal_use
        && let Some(requested) = inputs.requested
    {
        return Ok(requested);
    }
    if inputs.gitops_configured && inputs.mode == AppOfferingMode::Full && !inputs.oci_repository {
        Ok(DeploymentAppType::ArgoCd)
    } else {
        Ok(DeploymentAppType::Helm)
    }
}

impl InstallService {
    /// Write the app, installed app, version and first history row for one
    /// request. Nothing is committed here; the caller owns `tx`.
    pub async fn app_store_deploy_operation_db(
        &self,
        request: &InstallAppVersionRequest,
        tx: &mut dyn InstallTxn,
    ) -> Result<InstallAppVersionDto> {
        let gitops = self.collaborators.gitops.gitops_config().await?;
        if request.deployment_app_type == Some(DeploymentAppType::ArgoCd) && gitops.is_none() {
            return Err(InstallError::bad_request(
                GITOPS_MISSING_INTERNAL,
                GITOPS_MISSING_USER,
            ));
        }

        let environment = self.resolve_environment(request).await?;
        let app_store_version = self
            .collaborators
            .app_store
            .find_version(request.app_store_version_id)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    InstallError::NotFound(format!(
                        "app store version {} not found",
                        request.app_store_version_id
                    ))
                } else {
                    e.into()
                }
            })?;

        let values = self.resolve_values(request, &app_store_version.default_values).await?;
        values_document(&app_store_version.chart_name, &values)?;

        let deployment_app_type = select_deployment_app_type(DeploymentTypeInputs {
            requested: request.deployment_app_type,
            gitops_configured: gitops.is_some(),
            mode: self.settings.app_offering_mode,
            internal_use: self.settings.internal_use,
            virtual_environment: environment.is_virtual_environment,
            oci_repository: app_store_version.is_oci,
        })?;

        let app = resolve_app(tx, request).await?;

        let git_ops_repo_name =
            (deployment_app_type == DeploymentAppType::ArgoCd).then(|| app.app_name.clone());
        let installed_app = tx
            .insert_installed_app(&NewInstalledApp {
                app_id: app.id,
                environment_id: environment.id,
                status: InstallStatus::DeployInit,
                deployment_app_type: deployment_app_type.as_str().to_string(),
                git_ops_repo_name: git_ops_repo_name.clone(),
                created_by: request.user_id,
            })
            .await?;

        let version = tx
            .insert_installed_app_version(&NewInstalledAppVersion {
                installed_app_id: installed_app.id,
                app_store_application_version_id: app_store_version.id,
                values_yaml: values.clone(),
                reference_value_id: request.reference_value_id,
                reference_value_kind: request.reference_value_kind.clone(),
                created_by: request.user_id,
            })
            .await?;

        let history = tx
            .insert_history(&NewHistory {
                installed_app_version_id: version.id,
                values_yaml_raw: values.clone(),
                git_hash: None,
                status: HistoryStatus::InProgress,
                helm_release_status_config: None,
                created_by: request.user_id,
            })
            .await?;

        info!(
            app = %app.app_name,
            environment = %environment.name,
            installed_app_id = installed_app.id,
            deployment_app_type = deployment_app_type.as_str(),
            "Install rows written"
        );

        Ok(InstallAppVersionDto {
            app_id: app.id,
            app_name: app.app_name,
            installed_app_id: installed_app.id,
            installed_app_version_id: version.id,
            installed_app_version_history_id: history.id,
            environment,
            app_store_version,
            values_override_yaml: values,
            deployment_app_type,
            git_ops_repo_name,
            user_id: request.user_id,
            chart_group_entry_id: request.chart_group_entry_id,
        })
    }

    async fn resolve_environment(&self, request: &InstallAppVersionRequest) -> Result<Environment> {
        let environments = &self.collaborators.environments;
        if self.settings.app_offering_mode == AppOfferingMode::Hyperion {
            let cluster = environments.find_cluster(request.cluster_id).await?;
            return match environments
                .find_by_namespace_and_cluster(&request.namespace, request.cluster_id)
                .await
            {
                Ok(environment) => Ok(environment),
                Err(e) if e.is_not_found() => {
                    let created = environments
                        .create(NewEnvironment {
                            name: format!("{}--{}", cluster.name, request.namespace),
                            namespace: request.namespace.clone(),
                            cluster_id: cluster.id,
                        })
                        .await?;
                    info!(environment = %created.name, cluster_id = cluster.id, "Environment created");
                    Ok(created)
                }
                Err(e) => Err(e.into()),
            };
        }

        let environment_id = request.environment_id.ok_or_else(|| {
            InstallError::bad_request("environment id missing in request", "select an environment")
        })?;
        environments.find_by_id(environment_id).await.map_err(|e| {
            if e.is_not_found() {
                InstallError::NotFound(format!("environment {} not found", environment_id))
            } else {
                e.into()
            }
        })
    }

    /// The request's values, or the referenced ones when it carries none.
    async fn resolve_values(
        &self,
        request: &InstallAppVersionRequest,
        default_values: &str,
    ) -> Result<String> {
        if !request.values_override_yaml.trim().is_empty() {
            return Ok(request.values_override_yaml.clone());
        }
        if request.reference_value_kind.as_deref() == Some(REFERENCE_KIND_DEFAULT) {
            return Ok(default_values.to_string());
        }
        match request.reference_value_id {
            Some(id) => Ok(self.collaborators.app_store.find_values(id).await?),
            None => Ok(default_values.to_string()),
        }
    }
}

/// Reuse the caller's active app of this name, or create one. Further
/// active duplicates are tombstoned.
async fn resolve_app(tx: &mut dyn InstallTxn, request: &InstallAppVersionRequest) -> Result<AppRecord> {
    let existing = tx.find_active_apps_by_name(&request.app_name).await?;
    let Some((first, duplicates)) = existing.split_first() else {
        return Ok(tx
            .insert_app(&NewApp {
                app_name: request.app_name.clone(),
                team_id: request.team_id,
                created_by: request.user_id,
            })
            .await?);
    };

    if first.created_by != request.user_id {
        return Err(InstallError::bad_request(
            format!(
                "app {} already exists and belongs to user {}",
                request.app_name, first.created_by
            ),
            format!("app {} already exists, choose another name", request.app_name),
        ));
    }

    for duplicate in duplicates {
        let mut tombstone = duplicate.clone();
        tombstone.active = false;
        tx.update_app(&tombstone).await?;
        warn!(app = %duplicate.app_name, app_id = duplicate.id, "Tombstoned duplicate app");
    }
    Ok(first.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> DeploymentTypeInputs {
        DeploymentTypeInputs {
            requested: None,
            gitops_configured: true,
            mode: AppOfferingMode::Full,
            internal_use: false,
            virtual_environment: false,
            oci_repository: false,
        }
    }

    #[test]
    fn test_gitops_full_mode_selects_argo() {
        assert_eq!(
            select_deployment_app_type(inputs()).unwrap(),
            DeploymentAppType::ArgoCd
        );
    }

    #[test]
    fn test_oci_or_hyperion_selects_helm() {
        let mut oci = inputs();
        oci.oci_repository = true;
        assert_eq!(select_deployment_app_type(oci).unwrap(), DeploymentAppType::Helm);

        let mut hyperion = inputs();
        hyperion.mode = AppOfferingMode::Hyperion;
        assert_eq!(
            select_deployment_app_type(hyperion).unwrap(),
            DeploymentAppType::Helm
        );

        let mut no_gitops = inputs();
        no_gitops.gitops_configured = false;
        assert_eq!(
            select_deployment_app_type(no_gitops).unwrap(),
            DeploymentAppType::Helm
        );
    }

    #[test]
    fn test_virtual_environment_selects_manifest_download() {
        let mut virt = inputs();
        virt.virtual_environment = true;
        virt.requested = Some(DeploymentAppType::Helm);
        assert_eq!(
            select_deployment_app_type(virt).unwrap(),
            DeploymentAppType::ManifestDownload
        );
    }

    #[test]
    fn test_requested_type_honoured_outside_internal_use() {
        let mut requested = inputs();
        requested.requested = Some(DeploymentAppType::Helm);
        assert_eq!(
            select_deployment_app_type(requested).unwrap(),
            DeploymentAppType::Helm
        );

        requested.internal_use = true;
        assert_eq!(
            select_deployment_app_type(requested).unwrap(),
            DeploymentAppType::ArgoCd
        );
    }

    #[test]
    fn test_argo_without_gitops_is_bad_request() {
        let mut requested = inputs();
        requested.gitops_configured = false;
        requested.requested = Some(DeploymentAppType::ArgoCd);
        let err = select_deployment_app_type(requested).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.user_message().contains("GitOps"));

        requested.internal_use = true;
        assert!(select_deployment_app_type(requested).is_err());
    }
}
