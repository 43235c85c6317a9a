// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory collaborators for testing.
//!
//! Every mock keeps its state behind a `tokio::sync::Mutex`, records the
//! requests it receives and can be switched into a failing mode with an
//! atomic flag so a test can flip behaviour mid-run.

use async_trait::async_trait;
use serde_json::{Value, json};
use sha1::{Digest, Sha1};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::traits::*;

fn check(flag: &AtomicBool, what: &str) -> CollaboratorResult<()> {
    if flag.load(Ordering::SeqCst) {
        return Err(CollaboratorError::Transport(format!("{} failed", what)));
    }
    Ok(())
}

fn next(counter: &AtomicI64) -> i64 {
    counter.fetch_add(1, Ordering::SeqCst) + 1
}

/// Lowercase hex sha1 over the parts, in order.
fn content_hash(parts: &[&str]) -> String {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

// ============================================================================
// Apps, environments, workflows
// ============================================================================

/// App repository backed by a vector.
#[derive(Default)]
pub struct MockApps {
    apps: Mutex<Vec<AppRecord>>,
    ids: AtomicI64,
}

impl MockApps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an active app.
    pub async fn add(&self, name: &str) -> AppRecord {
        let app = AppRecord {
            id: next(&self.ids),
            app_name: name.to_string(),
            active: true,
            app_store: false,
            team_id: None,
            created_by: 1,
        };
        self.apps.lock().await.push(app.clone());
        app
    }
}

#[async_trait]
impl AppRepository for MockApps {
    async fn find_active_by_name(&self, name: &str) -> CollaboratorResult<AppRecord> {
        self.apps
            .lock()
            .await
            .iter()
            .find(|a| a.active && a.app_name == name)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(format!("app {}", name)))
    }

    async fn find_active_list_by_name(&self, name: &str) -> CollaboratorResult<Vec<AppRecord>> {
        Ok(self
            .apps
            .lock()
            .await
            .iter()
            .filter(|a| a.active && a.app_name == name)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MockEnvironments {
    environments: Mutex<Vec<Environment>>,
    clusters: Mutex<Vec<Cluster>>,
    ids: AtomicI64,
    /// Environments created through [`EnvironmentService::create`].
    pub created: Mutex<Vec<NewEnvironment>>,
}

impl MockEnvironments {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_cluster(&self, id: i64, name: &str) -> Cluster {
        let cluster = Cluster {
            id,
            name: name.to_string(),
            server_url: format!("https://{}.cluster.local", name),
        };
        self.clusters.lock().await.push(cluster.clone());
        cluster
    }

    pub async fn add(&self, name: &str, namespace: &str, cluster_id: i64) -> Environment {
        self.insert(name, namespace, cluster_id, false).await
    }

    pub async fn add_virtual(&self, name: &str, namespace: &str, cluster_id: i64) -> Environment {
        self.insert(name, namespace, cluster_id, true).await
    }

    async fn insert(
        &self,
        name: &str,
        namespace: &str,
        cluster_id: i64,
        is_virtual_environment: bool,
    ) -> Environment {
        let environment = Environment {
            id: next(&self.ids),
            name: name.to_string(),
            namespace: namespace.to_string(),
            cluster_id,
            is_virtual_environment,
        };
        self.environments.lock().await.push(environment.clone());
        environment
    }
}

#[async_trait]
impl EnvironmentService for MockEnvironments {
    async fn find_one(&self, name: &str) -> CollaboratorResult<Environment> {
        self.environments
            .lock()
            .await
            .iter()
            .find(|e| e.name == name)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(format!("environment {}", name)))
    }

    async fn find_by_id(&self, id: i64) -> CollaboratorResult<Environment> {
        self.environments
            .lock()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(format!("environment {}", id)))
    }

    async fn find_by_namespace_and_cluster(
        &self,
        namespace: &str,
        cluster_id: i64,
    ) -> CollaboratorResult<Environment> {
        self.environments
            .lock()
            .await
            .iter()
            .find(|e| e.namespace == namespace && e.cluster_id == cluster_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(format!("environment in {}", namespace)))
    }

    async fn create(&self, environment: NewEnvironment) -> CollaboratorResult<Environment> {
        self.created.lock().await.push(environment.clone());
        Ok(self
            .insert(
                &environment.name,
                &environment.namespace,
                environment.cluster_id,
                false,
            )
            .await)
    }

    async fn find_cluster(&self, cluster_id: i64) -> CollaboratorResult<Cluster> {
        self.clusters
            .lock()
            .await
            .iter()
            .find(|c| c.id == cluster_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(format!("cluster {}", cluster_id)))
    }
}

#[derive(Default)]
pub struct MockWorkflows {
    workflows: Mutex<Vec<WorkflowRecord>>,
    ids: AtomicI64,
    /// Ids passed to [`WorkflowRepository::delete`], in call order.
    pub deleted: Mutex<Vec<i64>>,
}

impl MockWorkflows {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<WorkflowRecord> {
        self.workflows.lock().await.clone()
    }
}

#[async_trait]
impl WorkflowRepository for MockWorkflows {
    async fn find_by_app_id(&self, app_id: i64) -> CollaboratorResult<Vec<WorkflowRecord>> {
        Ok(self
            .workflows
            .lock()
            .await
            .iter()
            .filter(|w| w.app_id == app_id)
            .cloned()
            .collect())
    }

    async fn find_by_name(&self, name: &str, app_id: i64) -> CollaboratorResult<WorkflowRecord> {
        self.workflows
            .lock()
            .await
            .iter()
            .find(|w| w.name == name && w.app_id == app_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(format!("workflow {}", name)))
    }

    async fn create(&self, app_id: i64, name: &str) -> CollaboratorResult<WorkflowRecord> {
        let workflow = WorkflowRecord {
            id: next(&self.ids),
            name: name.to_string(),
            app_id,
        };
        self.workflows.lock().await.push(workflow.clone());
        Ok(workflow)
    }

    async fn delete(&self, workflow_id: i64) -> CollaboratorResult<()> {
        let mut workflows = self.workflows.lock().await;
        let before = workflows.len();
        workflows.retain(|w| w.id != workflow_id);
        if workflows.len() == before {
            return Err(CollaboratorError::NotFound(format!("workflow {}", workflow_id)));
        }
        self.deleted.lock().await.push(workflow_id);
        Ok(())
    }
}

// ============================================================================
// Build and CD pipelines
// ============================================================================

#[derive(Default)]
pub struct MockCiPipelines {
    pipelines: Mutex<Vec<CiPipelineRecord>>,
    materials: Mutex<HashMap<i64, Vec<GitMaterial>>>,
    ids: AtomicI64,
    /// Every request passed to [`CiPipelineService::patch_ci_pipeline`].
    pub requests: Mutex<Vec<CiPipelineRequest>>,
    pub fail: AtomicBool,
}

impl MockCiPipelines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let mock = Self::default();
        mock.fail.store(true, Ordering::SeqCst);
        mock
    }

    pub async fn add_material(&self, app_id: i64, url: &str) -> GitMaterial {
        let mut materials = self.materials.lock().await;
        let list = materials.entry(app_id).or_default();
        let material = GitMaterial {
            id: (list.len() + 1) as i64,
            url: url.to_string(),
            checkout_path: "./".to_string(),
        };
        list.push(material.clone());
        material
    }

    pub async fn all(&self) -> Vec<CiPipelineRecord> {
        self.pipelines.lock().await.clone()
    }
}

#[async_trait]
impl CiPipelineService for MockCiPipelines {
    async fn patch_ci_pipeline(
        &self,
        request: CiPipelineRequest,
    ) -> CollaboratorResult<CiPipelineRecord> {
        check(&self.fail, "patch ci pipeline")?;
        self.requests.lock().await.push(request.clone());

        let mut pipelines = self.pipelines.lock().await;
        match request.action {
            PipelineAction::Create => {
                let record = CiPipelineRecord {
                    id: next(&self.ids),
                    name: request.name,
                    app_id: request.app_id,
                    workflow_id: request.workflow_id,
                };
                pipelines.push(record.clone());
                Ok(record)
            }
            PipelineAction::Delete => {
                let position = pipelines
                    .iter()
                    .position(|p| p.name == request.name)
                    .ok_or_else(|| {
                        CollaboratorError::NotFound(format!("ci pipeline {}", request.name))
                    })?;
                Ok(pipelines.remove(position))
            }
        }
    }

    async fn find_by_name(&self, name: &str) -> CollaboratorResult<CiPipelineRecord> {
        self.pipelines
            .lock()
            .await
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(format!("ci pipeline {}", name)))
    }

    async fn find_by_workflow(&self, workflow_id: i64) -> CollaboratorResult<Vec<CiPipelineRecord>> {
        Ok(self
            .pipelines
            .lock()
            .await
            .iter()
            .filter(|p| p.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn git_materials(&self, app_id: i64) -> CollaboratorResult<Vec<GitMaterial>> {
        Ok(self
            .materials
            .lock()
            .await
            .get(&app_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct MockCdPipelines {
    pipelines: Mutex<Vec<CdPipelineRecord>>,
    ids: AtomicI64,
    pub requests: Mutex<Vec<CdPipelineRequest>>,
    /// Ids passed to [`CdPipelineService::delete_cd_pipeline`], in call order.
    pub deleted: Mutex<Vec<i64>>,
    pub fail: AtomicBool,
}

impl MockCdPipelines {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<CdPipelineRecord> {
        self.pipelines.lock().await.clone()
    }
}

#[async_trait]
impl CdPipelineService for MockCdPipelines {
    async fn create_cd_pipelines(
        &self,
        request: CdPipelineRequest,
    ) -> CollaboratorResult<CdPipelineRecord> {
        check(&self.fail, "create cd pipeline")?;
        let record = CdPipelineRecord {
            id: next(&self.ids),
            name: request.name.clone(),
            app_id: request.app_id,
            environment_id: request.environment_id,
            workflow_id: request.workflow_id,
        };
        self.requests.lock().await.push(request);
        self.pipelines.lock().await.push(record.clone());
        Ok(record)
    }

    async fn find_by_workflow(&self, workflow_id: i64) -> CollaboratorResult<Vec<CdPipelineRecord>> {
        Ok(self
            .pipelines
            .lock()
            .await
            .iter()
            .filter(|p| p.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn delete_cd_pipeline(&self, pipeline_id: i64) -> CollaboratorResult<()> {
        check(&self.fail, "delete cd pipeline")?;
        let mut pipelines = self.pipelines.lock().await;
        let before = pipelines.len();
        pipelines.retain(|p| p.id != pipeline_id);
        if pipelines.len() == before {
            return Err(CollaboratorError::NotFound(format!("cd pipeline {}", pipeline_id)));
        }
        self.deleted.lock().await.push(pipeline_id);
        Ok(())
    }
}

// ============================================================================
// Config store
// ============================================================================

type DocumentKey = (ConfigKind, i64, Option<i64>);

/// Config store keyed by (kind, app, environment).
#[derive(Default)]
pub struct MockConfigStore {
    documents: Mutex<HashMap<DocumentKey, ConfigDocument>>,
    ids: AtomicI64,
    pub fail: AtomicBool,
}

impl MockConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed one entry.
    pub async fn put(
        &self,
        kind: ConfigKind,
        app_id: i64,
        environment_id: Option<i64>,
        entry: ConfigEntry,
    ) {
        let mut documents = self.documents.lock().await;
        let document = documents
            .entry((kind, app_id, environment_id))
            .or_insert_with(|| ConfigDocument {
                id: Some(next(&self.ids)),
                app_id,
                environment_id,
                entries: Vec::new(),
            });
        document.upsert(entry);
    }

    pub async fn entry(
        &self,
        kind: ConfigKind,
        app_id: i64,
        environment_id: Option<i64>,
        name: &str,
    ) -> Option<ConfigEntry> {
        self.documents
            .lock()
            .await
            .get(&(kind, app_id, environment_id))
            .and_then(|d| d.entry(name).cloned())
    }
}

#[async_trait]
impl ConfigMapService for MockConfigStore {
    async fn fetch(
        &self,
        kind: ConfigKind,
        app_id: i64,
        environment_id: Option<i64>,
    ) -> CollaboratorResult<ConfigDocument> {
        check(&self.fail, "fetch config")?;
        Ok(self
            .documents
            .lock()
            .await
            .get(&(kind, app_id, environment_id))
            .cloned()
            .unwrap_or(ConfigDocument {
                id: None,
                app_id,
                environment_id,
                entries: Vec::new(),
            }))
    }

    async fn add_update(
        &self,
        kind: ConfigKind,
        document: ConfigDocument,
    ) -> CollaboratorResult<ConfigDocument> {
        check(&self.fail, "add/update config")?;
        let mut documents = self.documents.lock().await;
        let stored = documents
            .entry((kind, document.app_id, document.environment_id))
            .or_insert_with(|| ConfigDocument {
                id: Some(next(&self.ids)),
                app_id: document.app_id,
                environment_id: document.environment_id,
                entries: Vec::new(),
            });
        if let Some(id) = document.id
            && stored.id != Some(id)
        {
            return Err(CollaboratorError::Rejected(format!(
                "config id {} does not match",
                id
            )));
        }
        for entry in document.entries {
            stored.upsert(entry);
        }
        Ok(stored.clone())
    }

    async fn delete(
        &self,
        kind: ConfigKind,
        app_id: i64,
        environment_id: Option<i64>,
        name: &str,
    ) -> CollaboratorResult<()> {
        check(&self.fail, "delete config")?;
        let mut documents = self.documents.lock().await;
        let document = documents
            .get_mut(&(kind, app_id, environment_id))
            .ok_or_else(|| CollaboratorError::NotFound(format!("{} {}", kind.as_str(), name)))?;
        let before = document.entries.len();
        document.entries.retain(|e| e.name != name);
        if document.entries.len() == before {
            return Err(CollaboratorError::NotFound(format!("{} {}", kind.as_str(), name)));
        }
        Ok(())
    }
}

// ============================================================================
// Charts
// ============================================================================

#[derive(Default)]
pub struct MockCharts {
    ids: AtomicI64,
    pub templates: Mutex<Vec<TemplateRequest>>,
    pub proxies: Mutex<Vec<ChartProxyRequest>>,
    pub fail: AtomicBool,
}

impl MockCharts {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChartService for MockCharts {
    async fn create(&self, request: TemplateRequest) -> CollaboratorResult<ChartRecord> {
        check(&self.fail, "create chart")?;
        let record = ChartRecord {
            id: next(&self.ids),
            app_id: request.app_id,
        };
        self.templates.lock().await.push(request);
        Ok(record)
    }

    async fn create_chart_proxy(&self, request: ChartProxyRequest) -> CollaboratorResult<PathBuf> {
        check(&self.fail, "create chart proxy")?;
        tokio::fs::create_dir_all(&request.target_dir)
            .await
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?;
        let chart = json!({
            "apiVersion": "v2",
            "name": request.chart_name,
            "version": request.chart_version,
        });
        tokio::fs::write(request.target_dir.join("Chart.yaml"), chart.to_string())
            .await
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?;
        let target = request.target_dir.clone();
        self.proxies.lock().await.push(request);
        Ok(target)
    }
}

// ============================================================================
// Git
// ============================================================================

/// Git service writing into a local directory. Commit hashes are sha1 over
/// what was committed, so identical inputs give identical hashes.
pub struct MockGit {
    root: PathBuf,
    repos: Mutex<HashSet<String>>,
    /// Operation log, one line per call.
    pub log: Mutex<Vec<String>>,
    pub fail_create_repo: AtomicBool,
    pub fail_commit: AtomicBool,
    pub fail_repo_url: AtomicBool,
    /// The next push of [`GitService::commit_and_push_all_changes`] fails once.
    pub fail_push_once: AtomicBool,
}

impl MockGit {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            repos: Mutex::new(HashSet::new()),
            log: Mutex::new(Vec::new()),
            fail_create_repo: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            fail_repo_url: AtomicBool::new(false),
            fail_push_once: AtomicBool::new(false),
        }
    }

    pub async fn calls(&self, prefix: &str) -> usize {
        self.log
            .lock()
            .await
            .iter()
            .filter(|l| l.starts_with(prefix))
            .count()
    }

    async fn record(&self, line: String) {
        self.log.lock().await.push(line);
    }
}

#[async_trait]
impl GitService for MockGit {
    fn clone_directory(&self, repo_name: &str) -> PathBuf {
        self.root.join(repo_name)
    }

    async fn clone(&self, url: &str, repo_name: &str) -> CollaboratorResult<PathBuf> {
        let dir = self.clone_directory(repo_name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?;
        self.record(format!("clone {} {}", repo_name, url)).await;
        Ok(dir)
    }

    async fn commit_and_push_all_changes(
        &self,
        dir: &Path,
        message: &str,
        user_name: &str,
        _user_email: &str,
    ) -> CollaboratorResult<String> {
        check(&self.fail_commit, "commit")?;
        if self.fail_push_once.swap(false, Ordering::SeqCst) {
            self.record(format!("push-rejected {}", message)).await;
            return Err(CollaboratorError::Rejected("non-fast-forward".to_string()));
        }
        let dir = dir.to_string_lossy();
        self.record(format!("commit-all {} {}", dir, message)).await;
        Ok(content_hash(&[&dir, message, user_name]))
    }

    async fn commit_values(&self, config: ChartConfig) -> CollaboratorResult<String> {
        check(&self.fail_commit, "commit values")?;
        let chart_dir = self
            .clone_directory(&config.repo_name)
            .join(&config.chart_location);
        tokio::fs::create_dir_all(&chart_dir)
            .await
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?;
        tokio::fs::write(chart_dir.join(&config.file_name), &config.file_content)
            .await
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?;
        self.record(format!(
            "commit {}/{} {}",
            config.chart_location, config.file_name, config.release_message
        ))
        .await;
        Ok(content_hash(&[
            &config.repo_name,
            &config.chart_location,
            &config.file_name,
            &config.file_content,
        ]))
    }

    async fn pull(&self, _dir: &Path, _url: &str, repo_name: &str) -> CollaboratorResult<()> {
        self.record(format!("pull {}", repo_name)).await;
        Ok(())
    }

    async fn repo_url(&self, repo_name: &str) -> CollaboratorResult<String> {
        check(&self.fail_repo_url, "repo url")?;
        Ok(format!("https://git.example.com/gitops/{}.git", repo_name))
    }

    async fn create_gitops_repo(&self, repo_name: &str) -> CollaboratorResult<GitOpsRepo> {
        check(&self.fail_create_repo, "create gitops repo")?;
        let is_new = self.repos.lock().await.insert(repo_name.to_string());
        self.record(format!("create-repo {} new={}", repo_name, is_new))
            .await;
        Ok(GitOpsRepo {
            url: self.repo_url(repo_name).await?,
            is_new,
        })
    }
}

pub struct MockGitOpsConfig {
    config: Mutex<Option<GitOpsConfig>>,
}

impl MockGitOpsConfig {
    pub fn configured() -> Self {
        Self {
            config: Mutex::new(Some(GitOpsConfig {
                user_name: "marina".to_string(),
                user_email: "marina@example.com".to_string(),
            })),
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            config: Mutex::new(None),
        }
    }

    pub async fn set(&self, config: Option<GitOpsConfig>) {
        *self.config.lock().await = config;
    }
}

#[async_trait]
impl GitOpsConfigReader for MockGitOpsConfig {
    async fn gitops_config(&self) -> CollaboratorResult<Option<GitOpsConfig>> {
        Ok(self.config.lock().await.clone())
    }
}

// ============================================================================
// Release controller and release manager
// ============================================================================

#[derive(Default)]
pub struct MockArgo {
    pub repos: Mutex<HashSet<String>>,
    pub apps: Mutex<HashMap<String, ArgoAppTemplate>>,
    pub syncs: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<(String, bool)>>,
    pub patches: Mutex<Vec<(String, Value, String)>>,
    pub fail: AtomicBool,
    /// Delay applied to every sync, for timeout tests.
    pub sync_delay: Mutex<Option<Duration>>,
}

impl MockArgo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let mock = Self::default();
        mock.fail.store(true, Ordering::SeqCst);
        mock
    }
}

#[async_trait]
impl ArgoClient for MockArgo {
    async fn register_repo(&self, repo_url: &str, upsert: bool) -> CollaboratorResult<()> {
        check(&self.fail, "register repo")?;
        let inserted = self.repos.lock().await.insert(repo_url.to_string());
        if !inserted && !upsert {
            return Err(CollaboratorError::Rejected(format!(
                "repository {} already exists",
                repo_url
            )));
        }
        Ok(())
    }

    async fn create_app(&self, template: ArgoAppTemplate) -> CollaboratorResult<()> {
        check(&self.fail, "create application")?;
        self.apps
            .lock()
            .await
            .insert(template.application_name.clone(), template);
        Ok(())
    }

    async fn sync(&self, name: &str) -> CollaboratorResult<()> {
        let delay = *self.sync_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        check(&self.fail, "sync")?;
        self.syncs.lock().await.push(name.to_string());
        Ok(())
    }

    async fn get(&self, name: &str) -> CollaboratorResult<ArgoApplication> {
        let apps = self.apps.lock().await;
        if !apps.contains_key(name) {
            return Err(CollaboratorError::NotFound(format!("application {}", name)));
        }
        let synced = self.syncs.lock().await.iter().any(|s| s == name);
        Ok(ArgoApplication {
            name: name.to_string(),
            sync_status: if synced { "Synced" } else { "OutOfSync" }.to_string(),
            health_status: "Healthy".to_string(),
        })
    }

    async fn delete(&self, name: &str, cascade: bool) -> CollaboratorResult<()> {
        check(&self.fail, "delete application")?;
        if self.apps.lock().await.remove(name).is_none() {
            return Err(CollaboratorError::NotFound(format!("application {}", name)));
        }
        self.deleted.lock().await.push((name.to_string(), cascade));
        Ok(())
    }

    async fn patch(&self, name: &str, patch: Value, patch_type: &str) -> CollaboratorResult<()> {
        check(&self.fail, "patch application")?;
        if !self.apps.lock().await.contains_key(name) {
            return Err(CollaboratorError::NotFound(format!("application {}", name)));
        }
        self.patches
            .lock()
            .await
            .push((name.to_string(), patch, patch_type.to_string()));
        Ok(())
    }
}

type ReleaseKey = (i64, String, String);

#[derive(Default)]
pub struct MockHelm {
    releases: Mutex<HashMap<ReleaseKey, InstallReleaseRequest>>,
    pub installs: Mutex<Vec<InstallReleaseRequest>>,
    pub updates: Mutex<Vec<InstallReleaseRequest>>,
    pub fail_install: AtomicBool,
    pub fail_delete: AtomicBool,
}

impl MockHelm {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_installed(&self, cluster_id: i64, release_name: &str, namespace: &str) -> bool {
        self.releases.lock().await.contains_key(&(
            cluster_id,
            release_name.to_string(),
            namespace.to_string(),
        ))
    }
}

#[async_trait]
impl HelmClient for MockHelm {
    async fn install_release(
        &self,
        cluster_id: i64,
        request: InstallReleaseRequest,
    ) -> CollaboratorResult<()> {
        check(&self.fail_install, "install release")?;
        self.installs.lock().await.push(request.clone());
        self.releases.lock().await.insert(
            (
                cluster_id,
                request.release_name.clone(),
                request.namespace.clone(),
            ),
            request,
        );
        Ok(())
    }

    async fn update_application_with_chart_info(
        &self,
        cluster_id: i64,
        request: InstallReleaseRequest,
    ) -> CollaboratorResult<()> {
        check(&self.fail_install, "update release")?;
        self.updates.lock().await.push(request.clone());
        self.releases.lock().await.insert(
            (
                cluster_id,
                request.release_name.clone(),
                request.namespace.clone(),
            ),
            request,
        );
        Ok(())
    }

    async fn is_release_installed(
        &self,
        cluster_id: i64,
        release_name: &str,
        namespace: &str,
    ) -> CollaboratorResult<bool> {
        Ok(self.is_installed(cluster_id, release_name, namespace).await)
    }

    async fn delete_application(
        &self,
        cluster_id: i64,
        release_name: &str,
        namespace: &str,
    ) -> CollaboratorResult<()> {
        check(&self.fail_delete, "delete release")?;
        self.releases
            .lock()
            .await
            .remove(&(cluster_id, release_name.to_string(), namespace.to_string()))
            .map(|_| ())
            .ok_or_else(|| CollaboratorError::NotFound(format!("release {}", release_name)))
    }
}

// ============================================================================
// App store and users
// ============================================================================

#[derive(Default)]
pub struct MockAppStore {
    versions: Mutex<HashMap<i64, AppStoreVersion>>,
    values: Mutex<HashMap<i64, String>>,
}

impl MockAppStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_version(&self, version: AppStoreVersion) {
        self.versions.lock().await.insert(version.id, version);
    }

    pub async fn add_values(&self, reference_value_id: i64, values: &str) {
        self.values
            .lock()
            .await
            .insert(reference_value_id, values.to_string());
    }
}

#[async_trait]
impl AppStoreCatalog for MockAppStore {
    async fn find_version(&self, id: i64) -> CollaboratorResult<AppStoreVersion> {
        self.versions
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(format!("app store version {}", id)))
    }

    async fn find_values(&self, reference_value_id: i64) -> CollaboratorResult<String> {
        self.values
            .lock()
            .await
            .get(&reference_value_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(format!("values {}", reference_value_id)))
    }
}

#[derive(Default)]
pub struct MockUsers {
    users: Mutex<HashMap<i64, User>>,
}

impl MockUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, id: i64, email_id: &str, active: bool) {
        self.users.lock().await.insert(
            id,
            User {
                id,
                email_id: email_id.to_string(),
                active,
            },
        );
    }
}

#[async_trait]
impl UserService for MockUsers {
    async fn get_by_id_include_deleted(&self, user_id: i64) -> CollaboratorResult<User> {
        self.users
            .lock()
            .await
            .get(&user_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(format!("user {}", user_id)))
    }
}

// ============================================================================
// Bundle
// ============================================================================

/// Every mock, kept typed so tests can seed and inspect them.
pub struct MockCollaborators {
    pub apps: Arc<MockApps>,
    pub environments: Arc<MockEnvironments>,
    pub workflows: Arc<MockWorkflows>,
    pub ci: Arc<MockCiPipelines>,
    pub cd: Arc<MockCdPipelines>,
    pub config_maps: Arc<MockConfigStore>,
    pub charts: Arc<MockCharts>,
    pub git: Arc<MockGit>,
    pub gitops: Arc<MockGitOpsConfig>,
    pub argo: Arc<MockArgo>,
    pub helm: Arc<MockHelm>,
    pub app_store: Arc<MockAppStore>,
    pub users: Arc<MockUsers>,
}

impl MockCollaborators {
    /// Fresh mocks with GitOps configured and clones under `git_root`.
    pub fn new(git_root: impl Into<PathBuf>) -> Self {
        Self {
            apps: Arc::new(MockApps::new()),
            environments: Arc::new(MockEnvironments::new()),
            workflows: Arc::new(MockWorkflows::new()),
            ci: Arc::new(MockCiPipelines::new()),
            cd: Arc::new(MockCdPipelines::new()),
            config_maps: Arc::new(MockConfigStore::new()),
            charts: Arc::new(MockCharts::new()),
            git: Arc::new(MockGit::new(git_root)),
            gitops: Arc::new(MockGitOpsConfig::configured()),
            argo: Arc::new(MockArgo::new()),
            helm: Arc::new(MockHelm::new()),
            app_store: Arc::new(MockAppStore::new()),
            users: Arc::new(MockUsers::new()),
        }
    }

    /// Type-erased view for the dispatcher and the install service.
    pub fn collaborators(&self) -> super::Collaborators {
        super::Collaborators {
            apps: self.apps.clone(),
            environments: self.environments.clone(),
            workflows: self.workflows.clone(),
            ci: self.ci.clone(),
            cd: self.cd.clone(),
            config_maps: self.config_maps.clone(),
            charts: self.charts.clone(),
            git: self.git.clone(),
            gitops: self.gitops.clone(),
            argo: self.argo.clone(),
            helm: self.helm.clone(),
            app_store: self.app_store.clone(),
            users: self.users.clone(),
        }
    }
}
