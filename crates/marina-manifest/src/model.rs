// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! App manifest node types.
//!
//! The JSON shape is camelCase. Every node carries `apiVersion`, `operation`,
//! `source` and `destination`; containers hand the last three down to their
//! children (see [`crate::inherit`]).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::path::{Operation, PathField, ResourcePath, Trigger};

/// The only manifest version currently accepted.
pub const API_VERSION_V1: &str = "app/v1";

// ============================================================================
// Kinds
// ============================================================================

/// Kind of a manifest node, used for version checks, uniqueness rules and
/// error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    App,
    Workflow,
    Build,
    Deployment,
    DeploymentTemplate,
    ConfigMap,
    Secret,
    Task,
}

impl ResourceKind {
    /// Name used in user-facing messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::App => "app",
            ResourceKind::Workflow => "workflow",
            ResourceKind::Build => "build",
            ResourceKind::Deployment => "deployment",
            ResourceKind::DeploymentTemplate => "deploymentTemplate",
            ResourceKind::ConfigMap => "configmap",
            ResourceKind::Secret => "secret",
            ResourceKind::Task => "task",
        }
    }

    /// Accepted `apiVersion` values for this kind.
    pub fn allowed_versions(&self) -> &'static [&'static str] {
        &[API_VERSION_V1]
    }

    /// Coordinates a declared destination must not carry.
    pub fn forbidden_destination_fields(&self) -> &'static [PathField] {
        match self {
            ResourceKind::Deployment => &[
                PathField::Workflow,
                PathField::Pipeline,
                PathField::ConfigMap,
                PathField::Secret,
            ],
            ResourceKind::Task => &[PathField::ConfigMap, PathField::Secret],
            _ => &[],
        }
    }

    /// The coordinate holding the entry name of a data holder.
    pub fn name_field(&self) -> Option<PathField> {
        match self {
            ResourceKind::ConfigMap => Some(PathField::ConfigMap),
            ResourceKind::Secret => Some(PathField::Secret),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// App
// ============================================================================

/// Root node of a manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    #[serde(default)]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_build_config: Option<DockerBuildConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ResourcePath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<ResourcePath>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workflows: Vec<Workflow>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_maps: Vec<DataHolder>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<DataHolder>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub git_repositories: Vec<GitRepository>,
    #[serde(
        default,
        deserialize_with = "crate::path::operation_or_unset",
        skip_serializing_if = "Option::is_none"
    )]
    pub operation: Option<Operation>,
}

/// How the app image is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerBuildConfig {
    #[serde(default)]
    pub git_material_url: String,
    #[serde(default)]
    pub dockerfile_relative_path: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
}

/// A source repository bound to the app.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRepository {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_path: Option<String>,
}

// ============================================================================
// Workflow & pipelines
// ============================================================================

/// An ordered group of pipelines within an app.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    #[serde(default)]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ResourcePath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<ResourcePath>,
    #[serde(
        default,
        deserialize_with = "crate::path::operation_or_unset",
        skip_serializing_if = "Option::is_none"
    )]
    pub operation: Option<Operation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipelines: Vec<Pipeline>,
}

/// Exactly one of a build or a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Pipeline {
    Build(Build),
    Deployment(Box<Deployment>),
}

/// Reference to another pipeline by path only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineRef {
    Build(NodeRef),
    Deployment(NodeRef),
}

impl PipelineRef {
    /// The referenced build's destination, if this refers to a build.
    pub fn build_destination(&self) -> Option<&ResourcePath> {
        match self {
            PipelineRef::Build(node) => node.destination.as_ref(),
            PipelineRef::Deployment(_) => None,
        }
    }
}

/// Source and destination of a referenced node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ResourcePath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<ResourcePath>,
}

/// A CI pipeline: source repositories to image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    #[serde(default)]
    pub api_version: String,
    #[serde(
        default,
        deserialize_with = "crate::path::operation_or_unset",
        skip_serializing_if = "Option::is_none"
    )]
    pub operation: Option<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ResourcePath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<ResourcePath>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_materials: Vec<BuildMaterial>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub docker_arguments: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_build: Option<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_build: Option<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_hook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_pipeline: Option<PipelineRef>,
}

/// A repository feeding a build and the rule selecting its revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildMaterial {
    pub git_material_url: String,
    pub source: SourceSelector,
}

/// Revision selector of a build material.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSelector {
    #[serde(rename = "type")]
    pub kind: SourceKind,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    #[default]
    BranchFixed,
    BranchRegex,
    TagAny,
    Webhook,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::BranchFixed => "SOURCE_TYPE_BRANCH_FIXED",
            SourceKind::BranchRegex => "SOURCE_TYPE_BRANCH_REGEX",
            SourceKind::TagAny => "SOURCE_TYPE_TAG_ANY",
            SourceKind::Webhook => "WEBHOOK",
        }
    }
}

// ============================================================================
// Deployment
// ============================================================================

/// A CD pipeline: image to environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    #[serde(default)]
    pub api_version: String,
    #[serde(
        default,
        deserialize_with = "crate::path::operation_or_unset",
        skip_serializing_if = "Option::is_none"
    )]
    pub operation: Option<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ResourcePath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<ResourcePath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    #[serde(default)]
    pub strategy: DeploymentStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<DeploymentTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_deployment: Option<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_deployment: Option<Task>,
    #[serde(default)]
    pub run_pre_stage_in_env: bool,
    #[serde(default)]
    pub run_post_stage_in_env: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_maps: Vec<DataHolder>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<DataHolder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_pipeline: Option<PipelineRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_pipeline: Option<PipelineRef>,
}

/// Declared rollout strategies. `default` names the one used when several are
/// present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blue_green: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recreate: Option<Value>,
    #[serde(default)]
    pub default: String,
}

/// A strategy variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyVariant {
    BlueGreen,
    Canary,
    Rolling,
    Recreate,
}

impl StrategyVariant {
    pub const ALL: [StrategyVariant; 4] = [
        StrategyVariant::BlueGreen,
        StrategyVariant::Canary,
        StrategyVariant::Rolling,
        StrategyVariant::Recreate,
    ];

    /// Label used by the release manager and in `strategy.default`.
    pub fn label(&self) -> &'static str {
        match self {
            StrategyVariant::BlueGreen => "BLUE-GREEN",
            StrategyVariant::Canary => "CANARY",
            StrategyVariant::Rolling => "ROLLING",
            StrategyVariant::Recreate => "RECREATE",
        }
    }

    /// Key of the variant inside the strategy document.
    pub fn key(&self) -> &'static str {
        match self {
            StrategyVariant::BlueGreen => "blueGreen",
            StrategyVariant::Canary => "canary",
            StrategyVariant::Rolling => "rolling",
            StrategyVariant::Recreate => "recreate",
        }
    }
}

impl DeploymentStrategy {
    /// Body of a variant when declared. JSON `null` counts as absent.
    pub fn variant(&self, variant: StrategyVariant) -> Option<&Value> {
        let body = match variant {
            StrategyVariant::BlueGreen => &self.blue_green,
            StrategyVariant::Canary => &self.canary,
            StrategyVariant::Rolling => &self.rolling,
            StrategyVariant::Recreate => &self.recreate,
        };
        body.as_ref().filter(|v| !v.is_null())
    }

    /// Declared variants in canonical order.
    pub fn declared(&self) -> Vec<(StrategyVariant, &Value)> {
        StrategyVariant::ALL
            .into_iter()
            .filter_map(|v| self.variant(v).map(|body| (v, body)))
            .collect()
    }

    pub fn has_any(&self) -> bool {
        !self.declared().is_empty()
    }
}

/// Chart and values of a deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentTemplate {
    #[serde(default)]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_ref_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_chart_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_chart_template_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values_override: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_app_override: Option<Value>,
    #[serde(default)]
    pub is_app_metrics_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ResourcePath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<ResourcePath>,
    #[serde(
        default,
        deserialize_with = "crate::path::operation_or_unset",
        skip_serializing_if = "Option::is_none"
    )]
    pub operation: Option<Operation>,
}

// ============================================================================
// Data holders & tasks
// ============================================================================

/// A configmap or a secret entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataHolder {
    #[serde(default)]
    pub api_version: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub external_type: String,
    #[serde(default)]
    pub global: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<String>,
    /// Entry data. Under clone, edit and append an empty string value
    /// removes the key from the destination.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ResourcePath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<ResourcePath>,
    #[serde(
        default,
        deserialize_with = "crate::path::operation_or_unset",
        skip_serializing_if = "Option::is_none"
    )]
    pub operation: Option<Operation>,
}

/// Scripts run before or after a build or deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<Stage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_maps: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ResourcePath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<ResourcePath>,
    #[serde(
        default,
        deserialize_with = "crate::path::operation_or_unset",
        skip_serializing_if = "Option::is_none"
    )]
    pub operation: Option<Operation>,
}

/// One script of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    #[serde(default)]
    pub name: String,
    #[serde(
        default,
        deserialize_with = "crate::path::operation_or_unset",
        skip_serializing_if = "Option::is_none"
    )]
    pub operation: Option<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// 1-based position; defaults to index + 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_location: Option<String>,
}

impl Stage {
    pub fn has_script(&self) -> bool {
        self.script.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

/// Parse a manifest document.
pub fn parse_app(json: &str) -> Result<App, serde_json::Error> {
    serde_json::from_str(json)
}
