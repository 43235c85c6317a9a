// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deploy stage: everything after the DB phase, resumable from the stored
//! status.

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::collaborators::{CollaboratorError, InstallReleaseRequest};
use crate::persistence::{InstalledAppVersionRecord, NewHistory};

use super::{
    DeploymentAppType, HistoryStatus, InstallAppVersionDto, InstallAppVersionRequest,
    InstallError, InstallService, InstallStatus, Result, cancellable,
};

impl InstallService {
    /// Install one app synchronously: DB phase in its own transaction, then
    /// the deploy stage.
    pub async fn install_app(
        &self,
        request: &InstallAppVersionRequest,
        cancel: &CancellationToken,
    ) -> Result<InstallAppVersionDto> {
        let mut tx = self.store.begin().await?;
        let dto = match self.app_store_deploy_operation_db(request, tx.as_mut()).await {
            Ok(dto) => dto,
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        };
        tx.commit().await?;

        self.deploy(&dto, cancel).await?;
        Ok(dto)
    }

    /// Run whatever phases the installed app still needs and finalise its
    /// history. Returns the status the install ended in.
    pub async fn deploy(
        &self,
        dto: &InstallAppVersionDto,
        cancel: &CancellationToken,
    ) -> Result<InstallStatus> {
        let installed = self
            .store
            .get_installed_app(dto.installed_app_id)
            .await?
            .ok_or_else(|| {
                InstallError::NotFound(format!("installed app {} not found", dto.installed_app_id))
            })?;
        let status: InstallStatus = installed.status.parse()?;
        if status == InstallStatus::DeploySuccess {
            info!(installed_app_id = dto.installed_app_id, "Already deployed");
            return Ok(status);
        }

        let history_id = dto.installed_app_version_history_id;
        match dto.deployment_app_type {
            DeploymentAppType::ManifestDownload => {}
            DeploymentAppType::Helm => {
                if let Err(e) = self.install_helm_release(dto).await {
                    self.transition(dto.installed_app_id, InstallStatus::HelmError)
                        .await?;
                    self.finalize(history_id, HistoryStatus::Failed).await?;
                    error!(installed_app_id = dto.installed_app_id, error = %e, "Helm install failed");
                    return Err(e);
                }
            }
            DeploymentAppType::ArgoCd => self.deploy_through_gitops(dto, status, cancel).await?,
        }

        // Only the run that wins the DEPLOY_SUCCESS write journals the values.
        if !self
            .transition(dto.installed_app_id, InstallStatus::DeploySuccess)
            .await?
        {
            let current = match self.store.get_installed_app(dto.installed_app_id).await? {
                Some(installed) => installed.status.parse()?,
                None => status,
            };
            info!(installed_app_id = dto.installed_app_id, status = %current, "Deploy finished by another run");
            return Ok(current);
        }
        self.finalize(history_id, HistoryStatus::Succeeded).await?;

        let git_hash = self
            .store
            .get_history(history_id)
            .await?
            .and_then(|h| h.git_hash);
        if let Some(git_hash) = git_hash {
            self.store
                .append_history(&NewHistory {
                    installed_app_version_id: dto.installed_app_version_id,
                    values_yaml_raw: dto.values_override_yaml.clone(),
                    git_hash: Some(git_hash),
                    status: HistoryStatus::Succeeded,
                    helm_release_status_config: None,
                    created_by: dto.user_id,
                })
                .await?;
        }

        info!(
            installed_app_id = dto.installed_app_id,
            release = %dto.release_name(),
            "Install deployed"
        );
        Ok(InstallStatus::DeploySuccess)
    }

    async fn deploy_through_gitops(
        &self,
        dto: &InstallAppVersionDto,
        status: InstallStatus,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let history_id = dto.installed_app_version_history_id;

        let mut repo_url = None;
        let mut chart_location = dto.release_name();
        if status.needs_git() {
            match self.run_git_phase(dto, cancel).await {
                Ok(outcome) => {
                    self.store
                        .record_git_hash(history_id, &outcome.git_hash)
                        .await?;
                    self.transition(dto.installed_app_id, InstallStatus::GitSuccess)
                        .await?;
                    repo_url = Some(outcome.repo_url);
                    chart_location = outcome.chart_location;
                }
                Err(InstallError::Cancelled) => {
                    info!(installed_app_id = dto.installed_app_id, "Git phase cancelled");
                    return Err(InstallError::Cancelled);
                }
                Err(e) => {
                    self.transition(dto.installed_app_id, InstallStatus::GitError)
                        .await?;
                    self.finalize(history_id, HistoryStatus::Failed).await?;
                    error!(installed_app_id = dto.installed_app_id, error = %e, "Git phase failed");
                    return Err(e);
                }
            }
        }
        if !status.needs_acd() {
            return Ok(());
        }

        let acd = async {
            let repo_url = match repo_url {
                Some(repo_url) => repo_url,
                // Resuming after GIT_SUCCESS: the repo was pushed by an earlier attempt.
                None => cancellable(cancel, self.collaborators.git.repo_url(dto.repo_name()))
                    .await
                    .map_err(|e| match e {
                        CollaboratorError::Cancelled => InstallError::Cancelled,
                        e => InstallError::Acd(format!("repo url lookup failed: {}", e)),
                    })?,
            };
            self.run_acd_phase(dto, &repo_url, &chart_location, cancel)
                .await
        };
        match acd.await {
            Ok(()) => {
                self.transition(dto.installed_app_id, InstallStatus::AcdSuccess)
                    .await?;
            }
            Err(InstallError::Cancelled) => {
                info!(installed_app_id = dto.installed_app_id, "ACD phase cancelled");
                return Err(InstallError::Cancelled);
            }
            Err(e) => {
                self.transition(dto.installed_app_id, InstallStatus::AcdError)
                    .await?;
                self.finalize(history_id, HistoryStatus::Failed).await?;
                error!(installed_app_id = dto.installed_app_id, error = %e, "ACD phase failed");
                return Err(e);
            }
        }
        Ok(())
    }

    pub(crate) fn release_request(&self, dto: &InstallAppVersionDto) -> InstallReleaseRequest {
        InstallReleaseRequest {
            release_name: dto.release_name(),
            namespace: dto.environment.namespace.clone(),
            chart_name: dto.app_store_version.chart_name.clone(),
            chart_version: dto.app_store_version.version.clone(),
            chart_repository_url: dto.app_store_version.repository_url.clone(),
            is_oci: dto.app_store_version.is_oci,
            values_yaml: dto.values_override_yaml.clone(),
        }
    }

    async fn install_helm_release(&self, dto: &InstallAppVersionDto) -> Result<()> {
        self.collaborators
            .helm
            .install_release(dto.environment.cluster_id, self.release_request(dto))
            .await
            .map_err(InstallError::Helm)
    }

    /// Deploy stage for a queued install, identified by its version and
    /// history row. A request that can no longer be rebuilt moves the
    /// install to `TRIGGER_ERROR`.
    pub async fn perform_deploy_stage(
        &self,
        installed_app_version_id: i64,
        history_id: i64,
        cancel: &CancellationToken,
    ) -> Result<InstallStatus> {
        let version = self
            .store
            .get_installed_app_version(installed_app_version_id)
            .await?
            .ok_or_else(|| {
                InstallError::NotFound(format!(
                    "installed app version {} not found",
                    installed_app_version_id
                ))
            })?;

        let dto = match self.rebuild_dto(&version, history_id).await {
            Ok(dto) => dto,
            Err(e @ InstallError::Database(_)) => return Err(e),
            Err(e) => {
                self.transition(version.installed_app_id, InstallStatus::TriggerError)
                    .await?;
                self.finalize(history_id, HistoryStatus::Failed).await?;
                error!(installed_app_version_id, error = %e, "Deploy stage could not start");
                return Err(e);
            }
        };
        self.deploy(&dto, cancel).await
    }

    /// Stored status of the install a queued version belongs to, or `None`
    /// when either row is gone.
    pub async fn deploy_stage_status(
        &self,
        installed_app_version_id: i64,
    ) -> Result<Option<InstallStatus>> {
        let Some(version) = self
            .store
            .get_installed_app_version(installed_app_version_id)
            .await?
        else {
            return Ok(None);
        };
        match self.store.get_installed_app(version.installed_app_id).await? {
            Some(installed) => Ok(Some(installed.status.parse()?)),
            None => Ok(None),
        }
    }

    /// Reassemble a DB-phase result from stored rows.
    pub(crate) async fn rebuild_dto(
        &self,
        version: &InstalledAppVersionRecord,
        history_id: i64,
    ) -> Result<InstallAppVersionDto> {
        let installed = self
            .store
            .get_installed_app(version.installed_app_id)
            .await?
            .ok_or_else(|| {
                InstallError::NotFound(format!(
                    "installed app {} not found",
                    version.installed_app_id
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
        let app_store_version = self
            .collaborators
            .app_store
            .find_version(version.app_store_application_version_id)
            .await?;

        Ok(InstallAppVersionDto {
            app_id: app.id,
            app_name: app.app_name,
            installed_app_id: installed.id,
            installed_app_version_id: version.id,
            installed_app_version_history_id: history_id,
            environment,
            app_store_version,
            values_override_yaml: version.values_yaml.clone(),
            deployment_app_type: installed.deployment_app_type.parse()?,
            git_ops_repo_name: installed.git_ops_repo_name,
            user_id: version.created_by,
            chart_group_entry_id: None,
        })
    }
}
