// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow executor.

use tracing::{info, warn};

use marina_manifest::{
    Inheritable, InheritedProps, Operation, Pipeline, ResourceKind, ValidationError, Workflow,
    inherit,
};

use crate::collaborators::CiPipelineRequest;

use super::{ActionContext, ActionError, Errors, Result, build, deployment, required, resolve_err, unhandled};

pub async fn execute(
    workflow: &mut Workflow,
    props: &InheritedProps,
    ctx: &ActionContext,
) -> Result<()> {
    inherit(workflow, props);
    ctx.ensure_active()?;

    match workflow.operation {
        Some(Operation::Create) => create(workflow, ctx).await,
        Some(Operation::Delete) => delete(workflow, ctx).await,
        other => Err(unhandled(other, ResourceKind::Workflow)),
    }
}

async fn create(workflow: &mut Workflow, ctx: &ActionContext) -> Result<()> {
    let collaborators = &ctx.collaborators;
    let destination = workflow.destination.as_ref();
    let app_name = required(destination, |d| d.app.as_ref(), "app", ResourceKind::Workflow)?.to_string();
    let name = destination
        .and_then(|d| d.workflow.clone())
        .filter(|w| !w.is_empty())
        .ok_or(ValidationError::NameEmpty {
            kind: ResourceKind::Workflow,
        })?;

    let app = collaborators
        .apps
        .find_active_by_name(&app_name)
        .await
        .map_err(resolve_err("app", &app_name))?;
    match collaborators.workflows.find_by_name(&name, app.id).await {
        Ok(_) => {
            return Err(ActionError::Resolution(format!(
                "workflow {} already exists in app {}",
                name, app_name
            )));
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }
    let record = collaborators.workflows.create(app.id, &name).await?;
    info!(app = %app_name, workflow = %name, workflow_id = record.id, "Workflow created");

    // Builds first so deployments can reference them.
    let props = workflow.inherited_props();
    let mut errors = Errors::default();
    for pipeline in workflow.pipelines.iter_mut() {
        if let Pipeline::Build(b) = pipeline {
            errors.record(build::execute(b, &props, ctx).await);
        }
    }
    for pipeline in workflow.pipelines.iter_mut() {
        if let Pipeline::Deployment(d) = pipeline {
            errors.record(deployment::execute(d, &props, ctx).await);
        }
    }
    errors.into_result()
}

/// Remove the workflow's deployments (newest first), then its builds, then
/// the workflow record itself.
async fn delete(workflow: &Workflow, ctx: &ActionContext) -> Result<()> {
    let collaborators = &ctx.collaborators;
    let destination = workflow.destination.as_ref();
    let app_name = required(destination, |d| d.app.as_ref(), "app", ResourceKind::Workflow)?;
    let name = required(destination, |d| d.workflow.as_ref(), "workflow", ResourceKind::Workflow)?;

    let app = collaborators
        .apps
        .find_active_by_name(app_name)
        .await
        .map_err(resolve_err("app", app_name))?;
    let record = collaborators
        .workflows
        .find_by_name(name, app.id)
        .await
        .map_err(resolve_err("workflow", name))?;

    let mut errors = Errors::default();
    let cd_pipelines = collaborators.cd.find_by_workflow(record.id).await?;
    for pipeline in cd_pipelines.iter().rev() {
        errors.record(
            collaborators
                .cd
                .delete_cd_pipeline(pipeline.id)
                .await
                .map_err(ActionError::from),
        );
    }
    let ci_pipelines = collaborators.ci.find_by_workflow(record.id).await?;
    for pipeline in ci_pipelines.iter().rev() {
        errors.record(
            collaborators
                .ci
                .patch_ci_pipeline(CiPipelineRequest::delete(app.id, record.id, &pipeline.name))
                .await
                .map(|_| ())
                .map_err(ActionError::from),
        );
    }

    let result = errors.into_result();
    if let Err(e) = &result {
        warn!(app = %app_name, workflow = %name, error = %e, "Workflow pipelines not removed, keeping workflow");
        return result;
    }
    collaborators.workflows.delete(record.id).await?;
    info!(
        app = %app_name,
        workflow = %name,
        cd_pipelines = cd_pipelines.len(),
        ci_pipelines = ci_pipelines.len(),
        "Workflow deleted"
    );
    Ok(())
}
