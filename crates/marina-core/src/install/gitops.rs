// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! GIT and ACD phases.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collaborators::{
    ArgoAppTemplate, ChartConfig, ChartProxyRequest, CollaboratorError, GitOpsConfig, GitService,
};

use super::request::{requirements_document, values_document};
use super::{InstallAppVersionDto, InstallError, InstallService, Result, cancellable};

/// Namespace the release controller's applications live in.
pub const ARGO_NAMESPACE: &str = "argocd";

/// Server used when the environment's cluster is unknown.
pub const IN_CLUSTER_SERVER: &str = "https://kubernetes.default.svc";

pub const REQUIREMENTS_FILE: &str = "requirements.yaml";
pub const VALUES_FILE: &str = "values.yaml";

/// Where the GIT phase left the chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOpsOutcome {
    pub repo_url: String,
    /// Chart directory inside the repository, `<app>-<env>`.
    pub chart_location: String,
    /// Commit hash of `values.yaml`.
    pub git_hash: String,
}

impl InstallService {
    async fn gitops_identity(&self) -> Result<GitOpsConfig> {
        self.collaborators
            .gitops
            .gitops_config()
            .await?
            .ok_or_else(|| {
                InstallError::Git(CollaboratorError::Rejected(
                    "gitops is not configured".to_string(),
                ))
            })
    }

    /// Render the proxy chart into the app's gitops repository and commit
    /// `requirements.yaml` and `values.yaml`. Safe to repeat: an existing
    /// clone is pulled and the files are rewritten in place.
    pub async fn run_git_phase(
        &self,
        dto: &InstallAppVersionDto,
        cancel: &CancellationToken,
    ) -> Result<GitOpsOutcome> {
        let git = &self.collaborators.git;
        let identity = self.gitops_identity().await?;
        let repo_name = dto.repo_name().to_string();
        let chart_location = dto.release_name();

        let repo = cancellable(cancel, git.create_gitops_repo(&repo_name))
            .await
            .map_err(git_error)?;
        let dir = git.clone_directory(&repo_name);
        let cloned = tokio::fs::try_exists(&dir).await?;
        if repo.is_new || !cloned {
            cancellable(cancel, GitService::clone(&**git, &repo.url, &repo_name))
                .await
                .map_err(git_error)?;
        } else {
            debug!(repo = %repo_name, "Clone exists, pulling");
            cancellable(cancel, git.pull(&dir, &repo.url, &repo_name))
                .await
                .map_err(git_error)?;
        }

        cancellable(
            cancel,
            self.collaborators.charts.create_chart_proxy(ChartProxyRequest {
                chart_name: dto.app_store_version.chart_name.clone(),
                chart_version: dto.app_store_version.version.clone(),
                target_dir: dir.join(&chart_location),
            }),
        )
        .await
        .map_err(git_error)?;

        if repo.is_new {
            let message = dto.release_message();
            let pushed = cancellable(
                cancel,
                git.commit_and_push_all_changes(
                    &dir,
                    &message,
                    &identity.user_name,
                    &identity.user_email,
                ),
            )
            .await;
            if let Err(e) = pushed {
                if e == CollaboratorError::Cancelled {
                    return Err(InstallError::Cancelled);
                }
                warn!(repo = %repo_name, error = %e, "Push rejected, pulling and retrying");
                cancellable(cancel, git.pull(&dir, &repo.url, &repo_name))
                    .await
                    .map_err(git_error)?;
                cancellable(
                    cancel,
                    git.commit_and_push_all_changes(
                        &dir,
                        &message,
                        &identity.user_name,
                        &identity.user_email,
                    ),
                )
                .await
                .map_err(git_error)?;
            }
        }

        let git_hash = self
            .commit_release_files(dto, &identity, &repo.url, true, cancel)
            .await?;

        info!(
            installed_app_id = dto.installed_app_id,
            repo = %repo_name,
            git_hash = %git_hash,
            "Chart committed"
        );
        Ok(GitOpsOutcome {
            repo_url: repo.url,
            chart_location,
            git_hash,
        })
    }

    /// Commit `requirements.yaml` (when asked) and `values.yaml`, pulling
    /// after each. Returns the values commit hash.
    pub(crate) async fn commit_release_files(
        &self,
        dto: &InstallAppVersionDto,
        identity: &GitOpsConfig,
        repo_url: &str,
        update_requirements: bool,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let git = &self.collaborators.git;
        let repo_name = dto.repo_name().to_string();
        let dir = git.clone_directory(&repo_name);
        let chart_config = |file_name: &str, file_content: String| ChartConfig {
            repo_name: repo_name.clone(),
            chart_location: dto.release_name(),
            file_name: file_name.to_string(),
            file_content,
            release_message: dto.release_message(),
            user_name: identity.user_name.clone(),
            user_email: identity.user_email.clone(),
        };

        if update_requirements {
            let requirements = requirements_document(&dto.app_store_version)?;
            cancellable(
                cancel,
                git.commit_values(chart_config(REQUIREMENTS_FILE, requirements)),
            )
            .await
            .map_err(git_error)?;
            cancellable(cancel, git.pull(&dir, repo_url, &repo_name))
                .await
                .map_err(git_error)?;
        }

        let values = values_document(&dto.app_store_version.chart_name, &dto.values_override_yaml)?;
        let git_hash = cancellable(cancel, git.commit_values(chart_config(VALUES_FILE, values)))
            .await
            .map_err(git_error)?;
        cancellable(cancel, git.pull(&dir, repo_url, &repo_name))
            .await
            .map_err(git_error)?;
        Ok(git_hash)
    }

    /// Register the repository, create the application and request a sync,
    /// all under the ACD timeout.
    pub async fn run_acd_phase(
        &self,
        dto: &InstallAppVersionDto,
        repo_url: &str,
        chart_location: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let argo = &self.collaborators.argo;
        let target_server = match self
            .collaborators
            .environments
            .find_cluster(dto.environment.cluster_id)
            .await
        {
            Ok(cluster) => cluster.server_url,
            Err(e) if e.is_not_found() => IN_CLUSTER_SERVER.to_string(),
            Err(e) => return Err(InstallError::Acd(e.to_string())),
        };
        let application_name = dto.release_name();
        let template = ArgoAppTemplate {
            application_name: application_name.clone(),
            namespace: ARGO_NAMESPACE.to_string(),
            target_namespace: dto.environment.namespace.clone(),
            target_server,
            repo_url: repo_url.to_string(),
            repo_path: chart_location.to_string(),
            values_file: VALUES_FILE.to_string(),
        };

        let steps = async {
            argo.register_repo(repo_url, true).await?;
            argo.create_app(template).await?;
            argo.sync(&application_name).await?;
            Ok::<(), CollaboratorError>(())
        };

        match tokio::time::timeout(self.settings.acd_timeout, cancellable(cancel, steps)).await {
            Ok(Ok(())) => {
                info!(application = %application_name, "Application registered and synced");
                Ok(())
            }
            Ok(Err(CollaboratorError::Cancelled)) => Err(InstallError::Cancelled),
            Ok(Err(e)) => Err(InstallError::Acd(format!(
                "error in creating acd application {}: {}",
                application_name, e
            ))),
            Err(_) => Err(InstallError::Acd(format!(
                "timed out after {:?} creating acd application {}",
                self.settings.acd_timeout, application_name
            ))),
        }
    }

    /// Sync an existing application under the ACD timeout.
    pub(crate) async fn sync_application(
        &self,
        dto: &InstallAppVersionDto,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let name = dto.release_name();
        match tokio::time::timeout(
            self.settings.acd_timeout,
            cancellable(cancel, self.collaborators.argo.sync(&name)),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(CollaboratorError::Cancelled)) => Err(InstallError::Cancelled),
            Ok(Err(e)) => Err(InstallError::Acd(format!("error syncing {}: {}", name, e))),
            Err(_) => Err(InstallError::Acd(format!("timed out syncing {}", name))),
        }
    }
}

fn git_error(e: CollaboratorError) -> InstallError {
    match e {
        CollaboratorError::Cancelled => InstallError::Cancelled,
        other => InstallError::Git(other),
    }
}
