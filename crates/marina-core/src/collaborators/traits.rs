// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Collaborator contracts.
//!
//! Everything marina drives but does not own: repositories of apps,
//! environments and workflows, the build and CD pipeline services, the
//! config store, charts, git, the release controller and the release manager.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use marina_manifest::transform::{StageScript, StrategyConfig};

/// Errors returned by collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CollaboratorError {
    /// The named entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The call did not reach the remote side or the connection broke.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote side refused the request.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The call did not finish in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The ambient cancellation token fired.
    #[error("cancelled")]
    Cancelled,
}

impl CollaboratorError {
    /// True for [`CollaboratorError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, CollaboratorError::NotFound(_))
    }
}

/// Result type for collaborator calls.
pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

// ============================================================================
// Apps, environments, workflows
// ============================================================================

/// An app row. `active = false` means tombstoned.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AppRecord {
    pub id: i64,
    pub app_name: String,
    pub active: bool,
    pub app_store: bool,
    pub team_id: Option<i64>,
    pub created_by: i64,
}

#[async_trait]
pub trait AppRepository: Send + Sync {
    /// The active app with this name.
    async fn find_active_by_name(&self, name: &str) -> CollaboratorResult<AppRecord>;

    /// Every active app with this name, oldest first.
    async fn find_active_list_by_name(&self, name: &str) -> CollaboratorResult<Vec<AppRecord>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: i64,
    pub name: String,
    pub namespace: String,
    pub cluster_id: i64,
    pub is_virtual_environment: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEnvironment {
    pub name: String,
    pub namespace: String,
    pub cluster_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: i64,
    pub name: String,
    pub server_url: String,
}

#[async_trait]
pub trait EnvironmentService: Send + Sync {
    async fn find_one(&self, name: &str) -> CollaboratorResult<Environment>;
    async fn find_by_id(&self, id: i64) -> CollaboratorResult<Environment>;
    async fn find_by_namespace_and_cluster(
        &self,
        namespace: &str,
        cluster_id: i64,
    ) -> CollaboratorResult<Environment>;
    async fn create(&self, environment: NewEnvironment) -> CollaboratorResult<Environment>;
    async fn find_cluster(&self, cluster_id: i64) -> CollaboratorResult<Cluster>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRecord {
    pub id: i64,
    pub name: String,
    pub app_id: i64,
}

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn find_by_app_id(&self, app_id: i64) -> CollaboratorResult<Vec<WorkflowRecord>>;
    async fn find_by_name(&self, name: &str, app_id: i64) -> CollaboratorResult<WorkflowRecord>;
    async fn create(&self, app_id: i64, name: &str) -> CollaboratorResult<WorkflowRecord>;
    async fn delete(&self, workflow_id: i64) -> CollaboratorResult<()>;
}

// ============================================================================
// Build and CD pipelines
// ============================================================================

/// A repository registered on an app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitMaterial {
    pub id: i64,
    pub url: String,
    pub checkout_path: String,
}

/// Source selection of one material in a CI pipeline request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CiMaterialSource {
    pub git_material_id: i64,
    pub source_type: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

/// Whether a CI patch creates or deletes the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PipelineAction {
    Create,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CiPipelineRequest {
    pub action: PipelineAction,
    pub app_id: i64,
    pub workflow_id: i64,
    pub name: String,
    pub is_external: bool,
    pub parent_ci_pipeline: Option<i64>,
    pub trigger_type: String,
    pub materials: Vec<CiMaterialSource>,
    pub docker_args: BTreeMap<String, String>,
    pub before_docker_build_scripts: Vec<StageScript>,
    pub after_docker_build_scripts: Vec<StageScript>,
    pub web_hook_url: Option<String>,
    pub access_key: Option<String>,
    pub payload: Option<String>,
}

impl CiPipelineRequest {
    /// Patch that removes the named pipeline.
    pub fn delete(app_id: i64, workflow_id: i64, name: impl Into<String>) -> Self {
        Self {
            action: PipelineAction::Delete,
            app_id,
            workflow_id,
            name: name.into(),
            is_external: false,
            parent_ci_pipeline: None,
            trigger_type: String::new(),
            materials: Vec::new(),
            docker_args: BTreeMap::new(),
            before_docker_build_scripts: Vec::new(),
            after_docker_build_scripts: Vec::new(),
            web_hook_url: None,
            access_key: None,
            payload: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiPipelineRecord {
    pub id: i64,
    pub name: String,
    pub app_id: i64,
    pub workflow_id: i64,
}

#[async_trait]
pub trait CiPipelineService: Send + Sync {
    /// Create or delete a CI pipeline, depending on `request.action`.
    async fn patch_ci_pipeline(
        &self,
        request: CiPipelineRequest,
    ) -> CollaboratorResult<CiPipelineRecord>;
    async fn find_by_name(&self, name: &str) -> CollaboratorResult<CiPipelineRecord>;
    async fn find_by_workflow(&self, workflow_id: i64) -> CollaboratorResult<Vec<CiPipelineRecord>>;
    async fn git_materials(&self, app_id: i64) -> CollaboratorResult<Vec<GitMaterial>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CdPipelineRequest {
    pub app_id: i64,
    pub environment_id: i64,
    pub workflow_id: i64,
    pub ci_pipeline_id: Option<i64>,
    pub name: String,
    pub namespace: String,
    pub trigger_type: String,
    pub strategies: Vec<StrategyConfig>,
    pub pre_stage: Option<String>,
    pub post_stage: Option<String>,
    pub pre_stage_config_maps: Vec<String>,
    pub pre_stage_secrets: Vec<String>,
    pub post_stage_config_maps: Vec<String>,
    pub post_stage_secrets: Vec<String>,
    pub run_pre_stage_in_env: bool,
    pub run_post_stage_in_env: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdPipelineRecord {
    pub id: i64,
    pub name: String,
    pub app_id: i64,
    pub environment_id: i64,
    pub workflow_id: i64,
}

#[async_trait]
pub trait CdPipelineService: Send + Sync {
    async fn create_cd_pipelines(
        &self,
        request: CdPipelineRequest,
    ) -> CollaboratorResult<CdPipelineRecord>;
    async fn find_by_workflow(&self, workflow_id: i64) -> CollaboratorResult<Vec<CdPipelineRecord>>;
    async fn delete_cd_pipeline(&self, pipeline_id: i64) -> CollaboratorResult<()>;
}

// ============================================================================
// Config store
// ============================================================================

/// Configmaps and secrets share one contract, parametrised by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKind {
    ConfigMap,
    Secret,
}

impl ConfigKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKind::ConfigMap => "configmap",
            ConfigKind::Secret => "secret",
        }
    }
}

/// One named configmap or secret.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub external: bool,
    pub mount_path: Option<String>,
    pub data: Map<String, Value>,
    pub default_data: Option<Map<String, Value>>,
    pub default_mount_path: Option<String>,
    pub global: bool,
    pub external_secret_type: String,
}

/// All entries of one kind for an app, globally or for one environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    pub id: Option<i64>,
    pub app_id: i64,
    pub environment_id: Option<i64>,
    pub entries: Vec<ConfigEntry>,
}

impl ConfigDocument {
    pub fn entry(&self, name: &str) -> Option<&ConfigEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Replace the entry of the same name, or append it.
    pub fn upsert(&mut self, entry: ConfigEntry) {
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }
}

#[async_trait]
pub trait ConfigMapService: Send + Sync {
    /// Fetch the app's document; environment-scoped when `environment_id` is set.
    async fn fetch(
        &self,
        kind: ConfigKind,
        app_id: i64,
        environment_id: Option<i64>,
    ) -> CollaboratorResult<ConfigDocument>;

    /// Create or update every entry of `document`.
    async fn add_update(
        &self,
        kind: ConfigKind,
        document: ConfigDocument,
    ) -> CollaboratorResult<ConfigDocument>;

    async fn delete(
        &self,
        kind: ConfigKind,
        app_id: i64,
        environment_id: Option<i64>,
        name: &str,
    ) -> CollaboratorResult<()>;
}

// ============================================================================
// Charts
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRequest {
    pub app_id: i64,
    pub chart_ref_id: Option<i64>,
    pub ref_chart_template: Option<String>,
    pub ref_chart_template_version: Option<String>,
    pub values_override: Value,
    pub default_app_override: Option<Value>,
    pub is_app_metrics_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartRecord {
    pub id: i64,
    pub app_id: i64,
}

/// Where and what to render as a proxy chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartProxyRequest {
    pub chart_name: String,
    pub chart_version: String,
    /// Directory the chart is materialised into.
    pub target_dir: PathBuf,
}

#[async_trait]
pub trait ChartService: Send + Sync {
    async fn create(&self, request: TemplateRequest) -> CollaboratorResult<ChartRecord>;

    /// Render a proxy chart into `request.target_dir`, replacing what is there.
    async fn create_chart_proxy(&self, request: ChartProxyRequest) -> CollaboratorResult<PathBuf>;
}

// ============================================================================
// Git
// ============================================================================

/// The gitops repository of an app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOpsRepo {
    pub url: String,
    /// True only the first time the repository is created.
    pub is_new: bool,
}

/// A single file committed through [`GitService::commit_values`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartConfig {
    pub repo_name: String,
    pub chart_location: String,
    pub file_name: String,
    pub file_content: String,
    pub release_message: String,
    pub user_name: String,
    pub user_email: String,
}

#[async_trait]
pub trait GitService: Send + Sync {
    /// Local clone directory for the repository.
    fn clone_directory(&self, repo_name: &str) -> PathBuf;
    async fn clone(&self, url: &str, repo_name: &str) -> CollaboratorResult<PathBuf>;
    async fn commit_and_push_all_changes(
        &self,
        dir: &std::path::Path,
        message: &str,
        user_name: &str,
        user_email: &str,
    ) -> CollaboratorResult<String>;
    async fn commit_values(&self, config: ChartConfig) -> CollaboratorResult<String>;
    async fn pull(&self, dir: &std::path::Path, url: &str, repo_name: &str) -> CollaboratorResult<()>;
    async fn repo_url(&self, repo_name: &str) -> CollaboratorResult<String>;
    async fn create_gitops_repo(&self, repo_name: &str) -> CollaboratorResult<GitOpsRepo>;
}

/// Identity used for gitops commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOpsConfig {
    pub user_name: String,
    pub user_email: String,
}

#[async_trait]
pub trait GitOpsConfigReader: Send + Sync {
    /// `None` when GitOps is not configured.
    async fn gitops_config(&self) -> CollaboratorResult<Option<GitOpsConfig>>;
}

// ============================================================================
// Release controller (argo) and release manager (helm)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgoAppTemplate {
    pub application_name: String,
    pub namespace: String,
    pub target_namespace: String,
    pub target_server: String,
    pub repo_url: String,
    pub repo_path: String,
    pub values_file: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgoApplication {
    pub name: String,
    pub sync_status: String,
    pub health_status: String,
}

#[async_trait]
pub trait ArgoClient: Send + Sync {
    /// Register a repository. Registering twice is not an error.
    async fn register_repo(&self, repo_url: &str, upsert: bool) -> CollaboratorResult<()>;
    async fn create_app(&self, template: ArgoAppTemplate) -> CollaboratorResult<()>;
    /// Non-blocking sync.
    async fn sync(&self, name: &str) -> CollaboratorResult<()>;
    async fn get(&self, name: &str) -> CollaboratorResult<ArgoApplication>;
    async fn delete(&self, name: &str, cascade: bool) -> CollaboratorResult<()>;
    async fn patch(&self, name: &str, patch: Value, patch_type: &str) -> CollaboratorResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReleaseRequest {
    pub release_name: String,
    pub namespace: String,
    pub chart_name: String,
    pub chart_version: String,
    pub chart_repository_url: String,
    pub is_oci: bool,
    pub values_yaml: String,
}

#[async_trait]
pub trait HelmClient: Send + Sync {
    async fn install_release(
        &self,
        cluster_id: i64,
        request: InstallReleaseRequest,
    ) -> CollaboratorResult<()>;
    async fn update_application_with_chart_info(
        &self,
        cluster_id: i64,
        request: InstallReleaseRequest,
    ) -> CollaboratorResult<()>;
    async fn is_release_installed(
        &self,
        cluster_id: i64,
        release_name: &str,
        namespace: &str,
    ) -> CollaboratorResult<bool>;
    async fn delete_application(
        &self,
        cluster_id: i64,
        release_name: &str,
        namespace: &str,
    ) -> CollaboratorResult<()>;
}

// ============================================================================
// App store and users
// ============================================================================

/// A chart version published in the app store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppStoreVersion {
    pub id: i64,
    pub chart_name: String,
    pub version: String,
    pub repository_url: String,
    pub is_oci: bool,
    pub default_values: String,
}

#[async_trait]
pub trait AppStoreCatalog: Send + Sync {
    async fn find_version(&self, id: i64) -> CollaboratorResult<AppStoreVersion>;
    /// Saved values referenced by an install request.
    async fn find_values(&self, reference_value_id: i64) -> CollaboratorResult<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub email_id: String,
    pub active: bool,
}

#[async_trait]
pub trait UserService: Send + Sync {
    async fn get_by_id_include_deleted(&self, user_id: i64) -> CollaboratorResult<User>;
}
