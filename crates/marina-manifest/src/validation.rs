// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Manifest validation.
//!
//! Each kind runs an ordered list of checks and collects every failure; no
//! check short-circuits the others. Validators canonicalise the node in place
//! (inherited props are filled in) and never touch durable state.
//!
//! Uniqueness and source/destination consistency are judged on the paths the
//! node declared itself, before inheritance. Clone checks run on the
//! inherited paths, since a cloned child usually names only its own leaf.

use std::fmt;
use thiserror::Error;

use crate::inherit::{Holder, Inheritable, compare_destination, compare_source, inherit};
use crate::model::{
    App, Build, DataHolder, Deployment, DeploymentTemplate, Pipeline, ResourceKind, Stage, Task,
    Workflow,
};
use crate::path::{InheritedProps, Operation, PathField, ResourcePath, equal};

// ============================================================================
// Errors
// ============================================================================

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("undefined operator for {kind}")]
    OperationUndefined { kind: ResourceKind },

    #[error("unimplemented operator {operation} for {kind}")]
    OperationUnimplemented {
        operation: Operation,
        kind: ResourceKind,
    },

    #[error("unsupported version {version} for {kind}")]
    UnsupportedVersion { version: String, kind: ResourceKind },

    #[error("source not same for {kind} and {parent}")]
    SourceNotSame {
        kind: ResourceKind,
        parent: ResourceKind,
    },

    #[error("destination not same for {kind} and {parent}")]
    DestinationNotSame {
        kind: ResourceKind,
        parent: ResourceKind,
    },

    #[error("source not unique for {kind}")]
    SourceNotUnique { kind: ResourceKind },

    #[error("destination not unique for {kind}")]
    DestinationNotUnique { kind: ResourceKind },

    #[error("source and destination cannot be same for {kind} clone")]
    SourceDestinationSame { kind: ResourceKind },

    #[error("source not defined to clone {kind}")]
    CloneSourceMissing { kind: ResourceKind },

    #[error("destination not defined to clone {kind}")]
    CloneDestinationMissing { kind: ResourceKind },

    #[error("source must be absent or equal to destination for {operation} of {kind}")]
    SourceDiffersFromDestination {
        operation: Operation,
        kind: ResourceKind,
    },

    #[error("name cannot be empty for {kind}")]
    NameEmpty { kind: ResourceKind },

    #[error("environment cannot be empty for {kind}")]
    EnvironmentEmpty { kind: ResourceKind },

    #[error("data cannot be empty for {kind}")]
    DataEmpty { kind: ResourceKind },

    #[error("external type cannot be empty for external {kind}")]
    ExternalTypeEmpty { kind: ResourceKind },

    #[error("task size cannot be zero")]
    StagesMissing,

    #[error("script is mandatory")]
    ScriptMissing,

    #[error("stage name or position is mandatory")]
    StageIdentifierMissing,

    #[error("atleast one deployment strategy should be defined in deployment pipeline creation")]
    StrategyMissing,

    #[error("default cannot be empty it should have one of BLUE-GREEN, CANARY, ROLLING, RECREATE")]
    StrategyDefaultMissing,
}

/// Every failure of one validation run, in check order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    pub fn contains(&self, error: &ValidationError) -> bool {
        self.0.contains(error)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&messages.join("\n"))
    }
}

impl std::error::Error for ValidationErrors {}

/// Accumulator for one validation run.
#[derive(Debug, Default)]
struct Report {
    errors: Vec<ValidationError>,
}

impl Report {
    fn check(&mut self, result: Result<(), ValidationError>) {
        if let Err(e) = result {
            self.errors.push(e);
        }
    }

    fn merge(&mut self, result: Result<(), ValidationErrors>) {
        if let Err(e) = result {
            self.errors.extend(e.0);
        }
    }

    fn finish(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(self.errors))
        }
    }
}

// ============================================================================
// Scope
// ============================================================================

/// What a check may look at besides the node itself.
struct Scope<'a> {
    parent: &'a InheritedProps,
    parent_kind: ResourceKind,
    declared_source: Option<ResourcePath>,
    declared_destination: Option<ResourcePath>,
}

impl<'a> Scope<'a> {
    /// Record the node's own paths, then apply the parent's props.
    fn enter<N: Inheritable + ?Sized>(
        node: &mut N,
        parent: &'a InheritedProps,
        parent_kind: ResourceKind,
    ) -> Self {
        let scope = Scope {
            parent,
            parent_kind,
            declared_source: node.source().cloned(),
            declared_destination: node.destination().cloned(),
        };
        inherit(node, parent);
        scope
    }
}

type Check<N> = fn(&N, &Scope<'_>) -> Result<(), ValidationError>;

fn run_checks<N>(node: &N, scope: &Scope<'_>, checks: &[Check<N>], report: &mut Report) {
    for check in checks {
        report.check(check(node, scope));
    }
}

// ============================================================================
// Shared checks
// ============================================================================

fn operation_defined<N: Inheritable + ?Sized>(node: &N) -> Result<(), ValidationError> {
    match node.operation() {
        None | Some(Operation::Undefined) => Err(ValidationError::OperationUndefined {
            kind: node.kind(),
        }),
        Some(_) => Ok(()),
    }
}

fn version_allowed(kind: ResourceKind, version: &str) -> Result<(), ValidationError> {
    if kind.allowed_versions().contains(&version) {
        Ok(())
    } else {
        Err(ValidationError::UnsupportedVersion {
            version: version.to_string(),
            kind,
        })
    }
}

fn matches_parent<N: Inheritable + ?Sized>(
    node: &N,
    scope: &Scope<'_>,
    report: &mut Report,
) {
    report.check(compare_source(
        node,
        scope.parent.source.as_ref(),
        scope.parent_kind,
    ));
    report.check(compare_destination(
        node,
        scope.parent.destination.as_ref(),
        scope.parent_kind,
    ));
}

/// Source/destination rules shared by every kind: a clone needs two distinct
/// non-empty paths, anything else may only repeat its destination as source.
fn source_destination_consistent<N: Inheritable + ?Sized>(
    node: &N,
    scope: &Scope<'_>,
) -> Vec<ValidationError> {
    let kind = node.kind();
    let mut errors = Vec::new();
    match node.operation() {
        Some(Operation::Clone) => {
            let source = node.source().filter(|p| !p.is_empty());
            let destination = node.destination().filter(|p| !p.is_empty());
            if source.is_none() {
                errors.push(ValidationError::CloneSourceMissing { kind });
            }
            if destination.is_none() {
                errors.push(ValidationError::CloneDestinationMissing { kind });
            }
            if source.is_some() && destination.is_some() && equal(source, destination) {
                errors.push(ValidationError::SourceDestinationSame { kind });
            }
        }
        _ => errors.extend(source_matches_destination(node, scope).err()),
    }
    errors
}

/// Outside clone, a declared source may only repeat the declared destination.
fn source_matches_destination<N: Inheritable + ?Sized>(
    node: &N,
    scope: &Scope<'_>,
) -> Result<(), ValidationError> {
    let Some(operation) = node.operation().filter(|op| *op != Operation::Clone) else {
        return Ok(());
    };
    match scope.declared_source.as_ref().filter(|p| !p.is_empty()) {
        Some(source) if !equal(Some(source), scope.declared_destination.as_ref()) => {
            Err(ValidationError::SourceDiffersFromDestination {
                operation,
                kind: node.kind(),
            })
        }
        _ => Ok(()),
    }
}

fn destination_unique(kind: ResourceKind, declared: Option<&ResourcePath>) -> Result<(), ValidationError> {
    let Some(declared) = declared else {
        return Ok(());
    };
    if kind
        .forbidden_destination_fields()
        .iter()
        .any(|f| declared.has(*f))
    {
        return Err(ValidationError::DestinationNotUnique { kind });
    }
    Ok(())
}

// ============================================================================
// App
// ============================================================================

/// Validate a whole manifest, canonicalising it in place.
pub fn validate_app(app: &mut App) -> Result<(), ValidationErrors> {
    let root = InheritedProps::default();
    let scope = Scope::enter(app, &root, ResourceKind::App);
    let mut report = Report::default();

    report.check(operation_defined(app));
    report.check(version_allowed(ResourceKind::App, &app.api_version));
    report.errors.extend(source_destination_consistent(app, &scope));

    let props = app.inherited_props();
    for holder in app.config_maps.iter_mut() {
        report.merge(validate_data_holder(
            holder,
            ResourceKind::ConfigMap,
            &props,
            ResourceKind::App,
        ));
    }
    for holder in app.secrets.iter_mut() {
        report.merge(validate_data_holder(
            holder,
            ResourceKind::Secret,
            &props,
            ResourceKind::App,
        ));
    }
    for workflow in app.workflows.iter_mut() {
        report.merge(validate_workflow(workflow, &props));
    }

    report.finish()
}

// ============================================================================
// Workflow
// ============================================================================

const WORKFLOW_CHECKS: &[Check<Workflow>] = &[
    |wf, _| operation_defined(wf),
    |wf, _| version_allowed(ResourceKind::Workflow, &wf.api_version),
];

/// Validate a workflow and its pipelines under the app's props.
pub fn validate_workflow(
    workflow: &mut Workflow,
    parent: &InheritedProps,
) -> Result<(), ValidationErrors> {
    let scope = Scope::enter(workflow, parent, ResourceKind::App);
    let mut report = Report::default();

    run_checks(workflow, &scope, WORKFLOW_CHECKS, &mut report);
    matches_parent(workflow, &scope, &mut report);
    report
        .errors
        .extend(source_destination_consistent(workflow, &scope));

    let props = workflow.inherited_props();
    for pipeline in workflow.pipelines.iter_mut() {
        match pipeline {
            Pipeline::Build(build) => report.merge(validate_build(build, &props)),
            Pipeline::Deployment(deployment) => {
                report.merge(validate_deployment(deployment, &props))
            }
        }
    }

    report.finish()
}

// ============================================================================
// Build
// ============================================================================

const BUILD_CHECKS: &[Check<Build>] = &[
    |build, _| operation_defined(build),
    |build, _| version_allowed(ResourceKind::Build, &build.api_version),
    |build, _| match build.operation {
        Some(Operation::Clone) => Err(ValidationError::OperationUnimplemented {
            operation: Operation::Clone,
            kind: ResourceKind::Build,
        }),
        _ => Ok(()),
    },
];

/// Validate a build pipeline under its workflow's props.
pub fn validate_build(build: &mut Build, parent: &InheritedProps) -> Result<(), ValidationErrors> {
    let scope = Scope::enter(build, parent, ResourceKind::Workflow);
    let mut report = Report::default();

    run_checks(build, &scope, BUILD_CHECKS, &mut report);
    matches_parent(build, &scope, &mut report);
    // A source naming a pipeline points at the parent of an external CI.
    let external_ci = scope
        .declared_source
        .as_ref()
        .is_some_and(|s| s.has(PathField::Pipeline));
    if !external_ci {
        report.check(source_matches_destination(build, &scope));
    }

    let props = build.inherited_props();
    if let Some(task) = build.pre_build.as_mut() {
        report.merge(validate_task(task, &props, ResourceKind::Build));
    }
    if let Some(task) = build.post_build.as_mut() {
        report.merge(validate_task(task, &props, ResourceKind::Build));
    }

    report.finish()
}

// ============================================================================
// Deployment
// ============================================================================

const DEPLOYMENT_TAIL_CHECKS: &[Check<Deployment>] = &[
    |_, scope| destination_unique(ResourceKind::Deployment, scope.declared_destination.as_ref()),
    |d, _| version_allowed(ResourceKind::Deployment, &d.api_version),
    |d, _| {
        if d.operation != Some(Operation::Clone) {
            return Ok(());
        }
        let unique = d.source.as_ref().is_some_and(|s| {
            s.has(PathField::App)
                && s.has(PathField::Environment)
                && !s.has(PathField::Pipeline)
        });
        if unique {
            Ok(())
        } else {
            Err(ValidationError::SourceNotUnique {
                kind: ResourceKind::Deployment,
            })
        }
    },
    |d, _| {
        if d.operation == Some(Operation::Clone)
            && d.source.is_some()
            && equal(d.source.as_ref(), d.destination.as_ref())
        {
            Err(ValidationError::SourceDestinationSame {
                kind: ResourceKind::Deployment,
            })
        } else {
            Ok(())
        }
    },
    |d, _| {
        if d.operation == Some(Operation::Create)
            && !d
                .destination
                .as_ref()
                .is_some_and(|p| p.has(PathField::Environment))
        {
            Err(ValidationError::EnvironmentEmpty {
                kind: ResourceKind::Deployment,
            })
        } else {
            Ok(())
        }
    },
    |d, _| {
        if d.operation == Some(Operation::Create) && !d.strategy.has_any() {
            Err(ValidationError::StrategyMissing)
        } else {
            Ok(())
        }
    },
    |d, _| {
        let declared = d.strategy.declared();
        if declared.len() > 1
            && !declared
                .iter()
                .any(|(v, _)| v.label() == d.strategy.default)
        {
            Err(ValidationError::StrategyDefaultMissing)
        } else {
            Ok(())
        }
    },
];

/// Validate a deployment pipeline under its workflow's props.
pub fn validate_deployment(
    deployment: &mut Deployment,
    parent: &InheritedProps,
) -> Result<(), ValidationErrors> {
    let scope = Scope::enter(deployment, parent, ResourceKind::Workflow);
    let mut report = Report::default();

    report.check(operation_defined(deployment));
    matches_parent(deployment, &scope, &mut report);
    report.check(source_matches_destination(deployment, &scope));

    let props = deployment.inherited_props();
    for holder in deployment.config_maps.iter_mut() {
        report.merge(validate_data_holder(
            holder,
            ResourceKind::ConfigMap,
            &props,
            ResourceKind::Deployment,
        ));
    }
    for holder in deployment.secrets.iter_mut() {
        report.merge(validate_data_holder(
            holder,
            ResourceKind::Secret,
            &props,
            ResourceKind::Deployment,
        ));
    }
    if let Some(task) = deployment.pre_deployment.as_mut() {
        report.merge(validate_task(task, &props, ResourceKind::Deployment));
    }
    if let Some(task) = deployment.post_deployment.as_mut() {
        report.merge(validate_task(task, &props, ResourceKind::Deployment));
    }
    if let Some(template) = deployment.template.as_mut() {
        report.merge(validate_deployment_template(template, &props));
    }

    run_checks(deployment, &scope, DEPLOYMENT_TAIL_CHECKS, &mut report);

    report.finish()
}

// ============================================================================
// Deployment template
// ============================================================================

const TEMPLATE_CHECKS: &[Check<DeploymentTemplate>] = &[
    |t, _| operation_defined(t),
    |t, _| version_allowed(ResourceKind::DeploymentTemplate, &t.api_version),
];

/// Validate a deployment template under its deployment's props.
pub fn validate_deployment_template(
    template: &mut DeploymentTemplate,
    parent: &InheritedProps,
) -> Result<(), ValidationErrors> {
    let scope = Scope::enter(template, parent, ResourceKind::Deployment);
    let mut report = Report::default();
    run_checks(template, &scope, TEMPLATE_CHECKS, &mut report);
    matches_parent(template, &scope, &mut report);
    report
        .errors
        .extend(source_destination_consistent(template, &scope));
    report.finish()
}

// ============================================================================
// Data holders
// ============================================================================

/// Validate a configmap or secret. `kind` must be [`ResourceKind::ConfigMap`]
/// or [`ResourceKind::Secret`].
pub fn validate_data_holder(
    node: &mut DataHolder,
    kind: ResourceKind,
    parent: &InheritedProps,
    parent_kind: ResourceKind,
) -> Result<(), ValidationErrors> {
    let mut holder = Holder { kind, node };
    let scope = Scope::enter(&mut holder, parent, parent_kind);
    let mut report = Report::default();

    report.check(operation_defined(&holder));
    report.check(version_allowed(kind, &holder.node.api_version));
    matches_parent(&holder, &scope, &mut report);

    report
        .errors
        .extend(source_destination_consistent(&holder, &scope));

    match holder.operation() {
        Some(Operation::Append | Operation::Edit) => {
            if holder.node.data.is_empty() {
                report.check(Err(ValidationError::DataEmpty { kind }));
            }
        }
        Some(Operation::Create) => {
            report.check(names_entry(&holder));
            let node = &holder.node;
            if !node.external && node.data.is_empty() {
                report.check(Err(ValidationError::DataEmpty { kind }));
            }
            if node.external && kind == ResourceKind::Secret && node.external_type.is_empty() {
                report.check(Err(ValidationError::ExternalTypeEmpty { kind }));
            }
        }
        Some(Operation::Delete) => report.check(names_entry(&holder)),
        Some(Operation::Clone | Operation::Undefined) | None => {}
    }

    report.finish()
}

/// The destination must name the app and the entry.
fn names_entry(holder: &Holder<'_>) -> Result<(), ValidationError> {
    let kind = holder.kind;
    let identified = holder.destination().is_some_and(|d| {
        d.has(PathField::App) && kind.name_field().is_some_and(|f| d.has(f))
    });
    if identified {
        Ok(())
    } else {
        Err(ValidationError::DestinationNotUnique { kind })
    }
}

// ============================================================================
// Tasks & stages
// ============================================================================

const TASK_CHECKS: &[Check<Task>] = &[
    |_, scope| destination_unique(ResourceKind::Task, scope.declared_destination.as_ref()),
    |task, _| version_allowed(ResourceKind::Task, &task.api_version),
    |task, _| {
        if task.operation == Some(Operation::Create) && task.stages.is_empty() {
            Err(ValidationError::StagesMissing)
        } else {
            Ok(())
        }
    },
];

/// Validate a pre/post task of a build or deployment.
pub fn validate_task(
    task: &mut Task,
    parent: &InheritedProps,
    parent_kind: ResourceKind,
) -> Result<(), ValidationErrors> {
    let scope = Scope::enter(task, parent, parent_kind);
    let mut report = Report::default();

    matches_parent(task, &scope, &mut report);
    report.errors.extend(source_destination_consistent(task, &scope));
    run_checks(task, &scope, TASK_CHECKS, &mut report);

    let task_operation = task.operation;
    for stage in &task.stages {
        report.merge(validate_stage(stage, task_operation));
    }

    report.finish()
}

/// Validate one stage. A stage without its own operation follows its task.
pub fn validate_stage(
    stage: &Stage,
    task_operation: Option<Operation>,
) -> Result<(), ValidationErrors> {
    let mut report = Report::default();
    let identified = !stage.name.trim().is_empty() || stage.position.is_some();

    match stage.operation.or(task_operation) {
        Some(Operation::Create) | Some(Operation::Append) => {
            if !stage.has_script() {
                report.check(Err(ValidationError::ScriptMissing));
            }
        }
        Some(Operation::Edit) => {
            if !identified {
                report.check(Err(ValidationError::StageIdentifierMissing));
            }
            if !stage.has_script() {
                report.check(Err(ValidationError::ScriptMissing));
            }
        }
        Some(Operation::Delete) => {
            if !identified {
                report.check(Err(ValidationError::StageIdentifierMissing));
            }
        }
        Some(Operation::Clone) | Some(Operation::Undefined) | None => {}
    }

    report.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeploymentStrategy, API_VERSION_V1};
    use serde_json::json;

    fn create_props(dest: ResourcePath) -> InheritedProps {
        InheritedProps {
            source: None,
            destination: Some(dest),
            operation: Some(Operation::Create),
        }
    }

    #[test]
    fn test_clone_with_same_source_and_destination_rejected() {
        let mut holder = DataHolder {
            api_version: API_VERSION_V1.into(),
            operation: Some(Operation::Clone),
            source: Some(ResourcePath::app("a")),
            destination: Some(ResourcePath::app("a")),
            ..Default::default()
        };
        let err = validate_data_holder(
            &mut holder,
            ResourceKind::ConfigMap,
            &InheritedProps::default(),
            ResourceKind::App,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "source and destination cannot be same for configmap clone"
        );
    }

    #[test]
    fn test_clone_accepted_with_distinct_paths() {
        let mut holder = DataHolder {
            api_version: API_VERSION_V1.into(),
            operation: Some(Operation::Clone),
            source: Some(ResourcePath::app("a").with(PathField::ConfigMap, "cm")),
            destination: Some(ResourcePath::app("b").with(PathField::ConfigMap, "cm")),
            ..Default::default()
        };
        assert!(
            validate_data_holder(
                &mut holder,
                ResourceKind::Secret,
                &InheritedProps::default(),
                ResourceKind::App,
            )
            .is_ok()
        );
    }

    #[test]
    fn test_errors_accumulate_without_short_circuit() {
        let mut build = Build {
            api_version: "app/v9".into(),
            ..Default::default()
        };
        let err = validate_build(&mut build, &InheritedProps::default()).unwrap_err();
        assert_eq!(err.len(), 2);
        assert_eq!(
            err.to_string(),
            "undefined operator for build\nunsupported version app/v9 for build"
        );
    }

    #[test]
    fn test_build_clone_unimplemented() {
        let mut build = Build {
            api_version: API_VERSION_V1.into(),
            operation: Some(Operation::Clone),
            ..Default::default()
        };
        let err = validate_build(&mut build, &InheritedProps::default()).unwrap_err();
        assert!(err.contains(&ValidationError::OperationUnimplemented {
            operation: Operation::Clone,
            kind: ResourceKind::Build,
        }));
    }

    #[test]
    fn test_unknown_verb_not_rescued_by_parent() {
        let mut build = Build {
            api_version: API_VERSION_V1.into(),
            operation: Some(Operation::Undefined),
            ..Default::default()
        };
        let err = validate_build(&mut build, &create_props(ResourcePath::app("a"))).unwrap_err();
        assert_eq!(err.to_string(), "undefined operator for build");
    }

    fn deployment(strategy: DeploymentStrategy) -> Deployment {
        Deployment {
            api_version: API_VERSION_V1.into(),
            operation: Some(Operation::Create),
            destination: Some(ResourcePath::default().with(PathField::Environment, "e")),
            strategy,
            ..Default::default()
        }
    }

    #[test]
    fn test_deployment_create_without_strategy() {
        let mut d = deployment(DeploymentStrategy {
            default: "BLUE-GREEN".into(),
            ..Default::default()
        });
        let parent = create_props(ResourcePath::app("a").with(PathField::Workflow, "w"));
        let err = validate_deployment(&mut d, &parent).unwrap_err();
        assert_eq!(
            err.to_string(),
            "atleast one deployment strategy should be defined in deployment pipeline creation"
        );
    }

    #[test]
    fn test_deployment_inherits_workflow_without_breaking_uniqueness() {
        let mut d = deployment(DeploymentStrategy {
            rolling: Some(json!({"maxSurge": "25%"})),
            ..Default::default()
        });
        let parent = create_props(ResourcePath::app("a").with(PathField::Workflow, "w"));
        validate_deployment(&mut d, &parent).unwrap();
        let dest = d.destination.unwrap();
        assert_eq!(dest.workflow.as_deref(), Some("w"));
        assert_eq!(dest.environment.as_deref(), Some("e"));
    }

    #[test]
    fn test_deployment_declared_workflow_not_unique() {
        let mut d = deployment(DeploymentStrategy {
            rolling: Some(json!({})),
            ..Default::default()
        });
        d.destination = Some(
            ResourcePath::default()
                .with(PathField::Environment, "e")
                .with(PathField::Pipeline, "cd"),
        );
        let err = validate_deployment(&mut d, &create_props(ResourcePath::app("a"))).unwrap_err();
        assert!(err.contains(&ValidationError::DestinationNotUnique {
            kind: ResourceKind::Deployment
        }));
    }

    #[test]
    fn test_deployment_create_requires_environment() {
        let mut d = deployment(DeploymentStrategy {
            canary: Some(json!({})),
            ..Default::default()
        });
        d.destination = None;
        let err = validate_deployment(&mut d, &create_props(ResourcePath::app("a"))).unwrap_err();
        assert!(err.contains(&ValidationError::EnvironmentEmpty {
            kind: ResourceKind::Deployment
        }));
    }

    #[test]
    fn test_deployment_multiple_strategies_need_default() {
        let mut d = deployment(DeploymentStrategy {
            canary: Some(json!({})),
            recreate: Some(json!({})),
            ..Default::default()
        });
        let err = validate_deployment(&mut d, &create_props(ResourcePath::app("a"))).unwrap_err();
        assert!(err.contains(&ValidationError::StrategyDefaultMissing));

        d.strategy.default = "RECREATE".into();
        assert!(validate_deployment(&mut d, &create_props(ResourcePath::app("a"))).is_ok());
    }

    #[test]
    fn test_deployment_clone_source_rules() {
        let mut d = deployment(DeploymentStrategy::default());
        d.operation = Some(Operation::Clone);
        d.source = Some(ResourcePath::app("a"));
        d.destination = Some(ResourcePath::app("a"));
        let err = validate_deployment(&mut d, &InheritedProps::default()).unwrap_err();
        assert!(err.contains(&ValidationError::SourceNotUnique {
            kind: ResourceKind::Deployment
        }));
        assert!(err.contains(&ValidationError::SourceDestinationSame {
            kind: ResourceKind::Deployment
        }));
    }

    #[test]
    fn test_deployment_child_errors_bubble_up() {
        let mut d = deployment(DeploymentStrategy {
            rolling: Some(json!({})),
            ..Default::default()
        });
        d.config_maps.push(DataHolder {
            api_version: "v0".into(),
            destination: Some(ResourcePath::default().with(PathField::ConfigMap, "cm")),
            data: serde_json::from_value(json!({"k": "v"})).unwrap(),
            ..Default::default()
        });
        let err = validate_deployment(&mut d, &create_props(ResourcePath::app("a"))).unwrap_err();
        assert_eq!(err.to_string(), "unsupported version v0 for configmap");
    }

    #[test]
    fn test_data_holder_edit_requires_data() {
        let mut holder = DataHolder {
            api_version: API_VERSION_V1.into(),
            operation: Some(Operation::Edit),
            destination: Some(ResourcePath::app("a").with(PathField::Secret, "s")),
            ..Default::default()
        };
        let err = validate_data_holder(
            &mut holder,
            ResourceKind::Secret,
            &InheritedProps::default(),
            ResourceKind::App,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "data cannot be empty for secret");
    }

    #[test]
    fn test_data_holder_create_external_rules() {
        let mut holder = DataHolder {
            api_version: API_VERSION_V1.into(),
            operation: Some(Operation::Create),
            external: true,
            destination: Some(ResourcePath::app("a").with(PathField::Secret, "s")),
            ..Default::default()
        };
        let err = validate_data_holder(
            &mut holder,
            ResourceKind::Secret,
            &InheritedProps::default(),
            ResourceKind::App,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "external type cannot be empty for external secret"
        );

        holder.external_type = "KubernetesSecret".into();
        assert!(
            validate_data_holder(
                &mut holder,
                ResourceKind::Secret,
                &InheritedProps::default(),
                ResourceKind::App,
            )
            .is_ok()
        );
    }

    #[test]
    fn test_data_holder_delete_must_name_entry() {
        let mut holder = DataHolder {
            api_version: API_VERSION_V1.into(),
            operation: Some(Operation::Delete),
            destination: Some(ResourcePath::app("a")),
            ..Default::default()
        };
        let err = validate_data_holder(
            &mut holder,
            ResourceKind::ConfigMap,
            &InheritedProps::default(),
            ResourceKind::App,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "destination not unique for configmap");
    }

    #[test]
    fn test_non_clone_source_must_match_destination() {
        let mut holder = DataHolder {
            api_version: API_VERSION_V1.into(),
            operation: Some(Operation::Delete),
            source: Some(ResourcePath::app("b").with(PathField::ConfigMap, "cm")),
            destination: Some(ResourcePath::app("a").with(PathField::ConfigMap, "cm")),
            ..Default::default()
        };
        let err = validate_data_holder(
            &mut holder,
            ResourceKind::ConfigMap,
            &InheritedProps::default(),
            ResourceKind::App,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "source must be absent or equal to destination for delete of configmap"
        );
    }

    #[test]
    fn test_stage_rules() {
        let script = |s: Option<&str>| Stage {
            script: s.map(String::from),
            ..Default::default()
        };
        assert_eq!(
            validate_stage(&script(None), Some(Operation::Create))
                .unwrap_err()
                .to_string(),
            "script is mandatory"
        );
        assert!(validate_stage(&script(Some("echo")), Some(Operation::Append)).is_ok());

        let err = validate_stage(&script(None), Some(Operation::Edit)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "stage name or position is mandatory\nscript is mandatory"
        );

        let positioned = Stage {
            position: Some(2),
            ..Default::default()
        };
        assert!(validate_stage(&positioned, Some(Operation::Delete)).is_ok());
        assert!(validate_stage(&Stage::default(), Some(Operation::Delete)).is_err());
    }

    #[test]
    fn test_task_create_without_stages() {
        let mut task = Task {
            api_version: API_VERSION_V1.into(),
            ..Default::default()
        };
        let err = validate_task(
            &mut task,
            &create_props(ResourcePath::app("a")),
            ResourceKind::Build,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "task size cannot be zero");
    }

    #[test]
    fn test_task_destination_may_not_name_config() {
        let mut task = Task {
            api_version: API_VERSION_V1.into(),
            destination: Some(ResourcePath::default().with(PathField::Secret, "s")),
            stages: vec![Stage {
                name: "lint".into(),
                script: Some("make lint".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let err = validate_task(
            &mut task,
            &create_props(ResourcePath::app("a")),
            ResourceKind::Build,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "destination not unique for task");
    }

    #[test]
    fn test_validate_app_canonicalises_tree() {
        let mut app: App = serde_json::from_value(json!({
            "apiVersion": "app/v1",
            "operation": "create",
            "destination": {"app": "checkout"},
            "workflows": [{
                "apiVersion": "app/v1",
                "destination": {"workflow": "main"},
                "pipelines": [{"build": {"apiVersion": "app/v1", "destination": {"pipeline": "ci"}}}]
            }]
        }))
        .unwrap();

        validate_app(&mut app).unwrap();

        let Pipeline::Build(build) = &app.workflows[0].pipelines[0] else {
            panic!("expected build");
        };
        assert_eq!(build.operation, Some(Operation::Create));
        let dest = build.destination.as_ref().unwrap();
        assert_eq!(dest.app.as_deref(), Some("checkout"));
        assert_eq!(dest.workflow.as_deref(), Some("main"));
        assert_eq!(dest.pipeline.as_deref(), Some("ci"));
    }

    #[test]
    fn test_workflow_conflicting_destination() {
        let mut wf = Workflow {
            api_version: API_VERSION_V1.into(),
            destination: Some(ResourcePath::app("other")),
            ..Default::default()
        };
        let err = validate_workflow(&mut wf, &create_props(ResourcePath::app("a"))).unwrap_err();
        assert_eq!(err.to_string(), "destination not same for workflow and app");
    }

    #[test]
    fn test_deployment_create_source_must_match_destination() {
        let mut d = deployment(DeploymentStrategy {
            rolling: Some(json!({})),
            ..Default::default()
        });
        d.source = Some(ResourcePath::app("other").with(PathField::Environment, "prod"));
        let parent = create_props(ResourcePath::app("a").with(PathField::Workflow, "w"));
        let err = validate_deployment(&mut d, &parent).unwrap_err();
        assert_eq!(
            err.to_string(),
            "source must be absent or equal to destination for create of deployment"
        );
    }

    #[test]
    fn test_task_source_must_match_destination() {
        let mut task = Task {
            api_version: API_VERSION_V1.into(),
            source: Some(ResourcePath::app("b")),
            stages: vec![Stage {
                name: "lint".into(),
                script: Some("make lint".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let err = validate_task(
            &mut task,
            &create_props(ResourcePath::app("a")),
            ResourceKind::Deployment,
        )
        .unwrap_err();
        assert!(err.contains(&ValidationError::SourceDiffersFromDestination {
            operation: Operation::Create,
            kind: ResourceKind::Task,
        }));
    }

    #[test]
    fn test_template_source_must_match_destination() {
        let mut template = DeploymentTemplate {
            api_version: API_VERSION_V1.into(),
            source: Some(ResourcePath::default().with(PathField::Environment, "prod")),
            destination: Some(ResourcePath::default().with(PathField::Environment, "e")),
            ..Default::default()
        };
        let err = validate_deployment_template(&mut template, &create_props(ResourcePath::app("a")))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "source must be absent or equal to destination for create of deploymentTemplate"
        );

        template.source = template.destination.clone();
        assert!(
            validate_deployment_template(&mut template, &create_props(ResourcePath::app("a")))
                .is_ok()
        );
    }

    #[test]
    fn test_template_clone_needs_distinct_paths() {
        let mut template = DeploymentTemplate {
            api_version: API_VERSION_V1.into(),
            operation: Some(Operation::Clone),
            ..Default::default()
        };
        let err = validate_deployment_template(&mut template, &InheritedProps::default())
            .unwrap_err();
        assert!(err.contains(&ValidationError::CloneSourceMissing {
            kind: ResourceKind::DeploymentTemplate,
        }));
        assert!(err.contains(&ValidationError::CloneDestinationMissing {
            kind: ResourceKind::DeploymentTemplate,
        }));
    }

    #[test]
    fn test_build_source_rules() {
        let parent = create_props(ResourcePath::app("a").with(PathField::Workflow, "w"));
        let mut build = Build {
            api_version: API_VERSION_V1.into(),
            source: Some(ResourcePath::app("b")),
            destination: Some(ResourcePath::default().with(PathField::Pipeline, "ci")),
            ..Default::default()
        };
        let err = validate_build(&mut build, &parent).unwrap_err();
        assert!(err.contains(&ValidationError::SourceDiffersFromDestination {
            operation: Operation::Create,
            kind: ResourceKind::Build,
        }));

        // A source pipeline marks an external CI and is allowed to differ.
        let mut external = Build {
            api_version: API_VERSION_V1.into(),
            source: Some(ResourcePath::default().with(PathField::Pipeline, "upstream")),
            destination: Some(ResourcePath::default().with(PathField::Pipeline, "ci")),
            ..Default::default()
        };
        assert!(validate_build(&mut external, &parent).is_ok());
    }
}
