// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Build (CI pipeline) executor.

use tracing::info;
use uuid::Uuid;

use marina_manifest::transform::docker_arguments;
use marina_manifest::{Build, Inheritable, InheritedProps, Operation, ResourceKind, inherit};

use crate::collaborators::{CiMaterialSource, CiPipelineRequest, PipelineAction};

use super::{ActionContext, ActionError, Result, required, resolve_err, task, unhandled};

pub async fn execute(build: &mut Build, props: &InheritedProps, ctx: &ActionContext) -> Result<()> {
    inherit(build, props);
    ctx.ensure_active()?;

    match build.operation {
        Some(Operation::Create) => create(build, ctx).await,
        Some(Operation::Delete) => delete(build, ctx).await,
        other => Err(unhandled(other, ResourceKind::Build)),
    }
}

async fn create(build: &mut Build, ctx: &ActionContext) -> Result<()> {
    let collaborators = &ctx.collaborators;
    let destination = build.destination.as_ref();
    let app_name = required(destination, |d| d.app.as_ref(), "app", ResourceKind::Build)?.to_string();
    let workflow_name =
        required(destination, |d| d.workflow.as_ref(), "workflow", ResourceKind::Build)?.to_string();

    let app = collaborators
        .apps
        .find_active_by_name(&app_name)
        .await
        .map_err(resolve_err("app", &app_name))?;
    let workflow = collaborators
        .workflows
        .find_by_name(&workflow_name, app.id)
        .await
        .map_err(resolve_err("workflow", &workflow_name))?;

    // The generated name is written back so the canonical manifest names it.
    let name = match destination.and_then(|d| d.pipeline.clone()).filter(|p| !p.is_empty()) {
        Some(name) => name,
        None => {
            let name = Uuid::new_v4().to_string();
            if let Some(destination) = build.destination.as_mut() {
                destination.pipeline = Some(name.clone());
            }
            name
        }
    };

    let props = build.inherited_props();
    let before = task::build_scripts(build.pre_build.as_mut(), &props, "preBuild")?;
    let after = task::build_scripts(build.post_build.as_mut(), &props, "postBuild")?;

    // A source pipeline other than this one marks an external CI.
    let parent = build
        .source
        .as_ref()
        .and_then(|s| s.pipeline.as_deref())
        .filter(|p| !p.is_empty() && *p != name);
    let parent_ci_pipeline = match parent {
        Some(parent) => Some(
            collaborators
                .ci
                .find_by_name(parent)
                .await
                .map_err(resolve_err("ci pipeline", parent))?
                .id,
        ),
        None => None,
    };

    let known = collaborators.ci.git_materials(app.id).await?;
    let mut materials = Vec::with_capacity(build.build_materials.len());
    for material in &build.build_materials {
        let git_material = known
            .iter()
            .find(|m| m.url == material.git_material_url)
            .ok_or_else(|| {
                ActionError::Resolution(format!(
                    "git material {} not found for app {}",
                    material.git_material_url, app_name
                ))
            })?;
        materials.push(CiMaterialSource {
            git_material_id: git_material.id,
            source_type: material.source.kind.as_str().to_string(),
            value: material.source.value.clone(),
            regex: material.source.regex.clone(),
        });
    }

    let request = CiPipelineRequest {
        action: PipelineAction::Create,
        app_id: app.id,
        workflow_id: workflow.id,
        name: name.clone(),
        is_external: parent_ci_pipeline.is_some(),
        parent_ci_pipeline,
        trigger_type: build.trigger.unwrap_or_default().as_str().to_string(),
        materials,
        docker_args: docker_arguments(&build.docker_arguments),
        before_docker_build_scripts: before,
        after_docker_build_scripts: after,
        web_hook_url: build.web_hook_url.clone(),
        access_key: build.access_key.clone(),
        payload: build.payload.clone(),
    };
    let record = collaborators.ci.patch_ci_pipeline(request).await?;

    info!(
        app = %app_name,
        workflow = %workflow_name,
        pipeline = %name,
        ci_pipeline_id = record.id,
        external = parent_ci_pipeline.is_some(),
        "Build pipeline created"
    );
    Ok(())
}

async fn delete(build: &Build, ctx: &ActionContext) -> Result<()> {
    let collaborators = &ctx.collaborators;
    let destination = build.destination.as_ref();
    let app_name = required(destination, |d| d.app.as_ref(), "app", ResourceKind::Build)?;
    let workflow_name = required(destination, |d| d.workflow.as_ref(), "workflow", ResourceKind::Build)?;
    let name = required(destination, |d| d.pipeline.as_ref(), "pipeline", ResourceKind::Build)?;

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
    collaborators
        .ci
        .patch_ci_pipeline(CiPipelineRequest::delete(app.id, workflow.id, name))
        .await
        .map_err(resolve_err("ci pipeline", name))?;

    info!(app = %app_name, pipeline = %name, "Build pipeline deleted");
    Ok(())
}
