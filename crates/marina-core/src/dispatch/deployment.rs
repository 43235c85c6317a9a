// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment (CD pipeline) executor.

use tracing::{info, warn};
use uuid::Uuid;

use marina_manifest::transform::{StageSlot, strategies};
use marina_manifest::{
    Deployment, Inheritable, InheritedProps, Operation, ResourceKind, ValidationError, inherit,
};

use crate::collaborators::{AppRecord, CdPipelineRequest};

use super::{
    ActionContext, ActionError, Errors, Result, data_holder, required, resolve_err, task, template,
    unhandled,
};

pub async fn execute(
    deployment: &mut Deployment,
    props: &InheritedProps,
    ctx: &ActionContext,
) -> Result<()> {
    inherit(deployment, props);
    ctx.ensure_active()?;

    match deployment.operation {
        Some(Operation::Create) => create(deployment, ctx).await,
        Some(Operation::Delete) => delete(deployment, ctx).await,
        other => Err(unhandled(other, ResourceKind::Deployment)),
    }
}

/// Full name of the build feeding a deployment: `<app>-ci-<name>` unless
/// already prefixed.
pub fn ci_pipeline_name(app_name: &str, pipeline: &str) -> String {
    let prefix = format!("{}-ci-", app_name);
    if pipeline.starts_with(&prefix) {
        pipeline.to_string()
    } else {
        format!("{}{}", prefix, pipeline)
    }
}

async fn create(deployment: &mut Deployment, ctx: &ActionContext) -> Result<()> {
    let collaborators = &ctx.collaborators;
    let destination = deployment.destination.as_ref();
    let kind = ResourceKind::Deployment;
    let app_name = required(destination, |d| d.app.as_ref(), "app", kind)?.to_string();
    let environment_name =
        required(destination, |d| d.environment.as_ref(), "environment", kind)?.to_string();
    let workflow_name = required(destination, |d| d.workflow.as_ref(), "workflow", kind)?.to_string();
    if !deployment.strategy.has_any() {
        return Err(ValidationError::StrategyMissing.into());
    }

    let app = collaborators
        .apps
        .find_active_by_name(&app_name)
        .await
        .map_err(resolve_err("app", &app_name))?;
    let environment = collaborators
        .environments
        .find_one(&environment_name)
        .await
        .map_err(resolve_err("environment", &environment_name))?;
    let workflow_id = collaborators
        .workflows
        .find_by_app_id(app.id)
        .await?
        .into_iter()
        .find(|w| w.name == workflow_name)
        .map(|w| w.id)
        .ok_or_else(|| ActionError::Resolution(format!("incorrect workflow name {}", workflow_name)))?;
    let ci_pipeline_id = previous_pipeline(deployment, &app, ctx).await?;

    let name = match destination.and_then(|d| d.pipeline.clone()).filter(|p| !p.is_empty()) {
        Some(name) => name,
        None => {
            let name = Uuid::new_v4().to_string();
            if let Some(destination) = deployment.destination.as_mut() {
                destination.pipeline = Some(name.clone());
            }
            name
        }
    };

    let props = deployment.inherited_props();
    let pre_stage = task::deployment_stage(deployment.pre_deployment.as_mut(), &props, StageSlot::Before)?;
    let post_stage = task::deployment_stage(deployment.post_deployment.as_mut(), &props, StageSlot::After)?;
    let (pre_stage_config_maps, pre_stage_secrets) = deployment
        .pre_deployment
        .as_ref()
        .map(|t| (t.config_maps.clone(), t.secrets.clone()))
        .unwrap_or_default();
    let (post_stage_config_maps, post_stage_secrets) = deployment
        .post_deployment
        .as_ref()
        .map(|t| (t.config_maps.clone(), t.secrets.clone()))
        .unwrap_or_default();

    let request = CdPipelineRequest {
        app_id: app.id,
        environment_id: environment.id,
        workflow_id,
        ci_pipeline_id,
        name: name.clone(),
        namespace: environment.namespace.clone(),
        trigger_type: deployment.trigger.unwrap_or_default().as_str().to_string(),
        strategies: strategies(&deployment.strategy)?,
        pre_stage,
        post_stage,
        pre_stage_config_maps,
        pre_stage_secrets,
        post_stage_config_maps,
        post_stage_secrets,
        run_pre_stage_in_env: deployment.run_pre_stage_in_env,
        run_post_stage_in_env: deployment.run_post_stage_in_env,
    };

    // Children first; their failures do not stop the pipeline itself.
    let mut errors = Errors::default();
    for holder in deployment.config_maps.iter_mut() {
        errors.record(data_holder::execute(holder, ResourceKind::ConfigMap, &props, ctx).await);
    }
    for holder in deployment.secrets.iter_mut() {
        errors.record(data_holder::execute(holder, ResourceKind::Secret, &props, ctx).await);
    }

    match collaborators.cd.create_cd_pipelines(request).await {
        Ok(record) => info!(
            app = %app_name,
            environment = %environment_name,
            pipeline = %name,
            cd_pipeline_id = record.id,
            "Deployment pipeline created"
        ),
        Err(e) => {
            warn!(app = %app_name, pipeline = %name, error = %e, "Deployment pipeline creation failed");
            errors.record(Err(ActionError::Resolution(format!(
                "error {} while creating deployment pipeline for app {}",
                e, app_name
            ))));
        }
    }

    errors.record(template::execute(deployment.template.as_mut(), &props, ctx).await);
    errors.into_result()
}

/// Resolve the referenced build, which must belong to the same app.
async fn previous_pipeline(
    deployment: &Deployment,
    app: &AppRecord,
    ctx: &ActionContext,
) -> Result<Option<i64>> {
    let Some(declared) = deployment
        .previous_pipeline
        .as_ref()
        .and_then(|p| p.build_destination())
        .and_then(|d| d.pipeline.as_deref())
        .filter(|p| !p.is_empty())
    else {
        return Ok(None);
    };

    let full_name = ci_pipeline_name(&app.app_name, declared);
    let ci = ctx
        .collaborators
        .ci
        .find_by_name(&full_name)
        .await
        .map_err(resolve_err("previous pipeline", &full_name))?;
    if ci.app_id != app.id {
        return Err(ActionError::Resolution(format!(
            "previous pipeline `{}` should belong to same application in deployment pipeline creation",
            declared
        )));
    }
    Ok(Some(ci.id))
}

async fn delete(deployment: &Deployment, ctx: &ActionContext) -> Result<()> {
    let collaborators = &ctx.collaborators;
    let destination = deployment.destination.as_ref();
    let kind = ResourceKind::Deployment;
    let app_name = required(destination, |d| d.app.as_ref(), "app", kind)?;
    let workflow_name = required(destination, |d| d.workflow.as_ref(), "workflow", kind)?;
    let name = required(destination, |d| d.pipeline.as_ref(), "pipeline", kind)?;

    let app = collaborators
        .apps
        .find_active_by_name(app_name)
        .await
        .map_err(resolve_err("app", app_name))?;
    let workflow = collaborators
        .workflows
        .find_by_name(workflow_name, app.id)
        .await
        .map_err(resolve_err("workflow", workflow_name))?;
    let pipeline = collaborators
        .cd
        .find_by_workflow(workflow.id)
        .await?
        .into_iter()
        .find(|p| p.name == name)
        .ok_or_else(|| ActionError::Resolution(format!("cd pipeline {} not found", name)))?;
    collaborators.cd.delete_cd_pipeline(pipeline.id).await?;

    info!(app = %app_name, pipeline = %name, "Deployment pipeline deleted");
    Ok(())
}
