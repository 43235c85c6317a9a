// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment template executor.

use serde_json::json;
use tracing::info;

use marina_manifest::{DeploymentTemplate, InheritedProps, Operation, ResourceKind, inherit};

use crate::collaborators::TemplateRequest;

use super::{ActionContext, Result, required, resolve_err, unhandled};

pub async fn execute(
    template: Option<&mut DeploymentTemplate>,
    props: &InheritedProps,
    ctx: &ActionContext,
) -> Result<()> {
    let Some(template) = template else {
        return Ok(());
    };
    inherit(template, props);
    ctx.ensure_active()?;

    match template.operation {
        Some(Operation::Create) => create(template, ctx).await,
        other => Err(unhandled(other, ResourceKind::DeploymentTemplate)),
    }
}

async fn create(template: &DeploymentTemplate, ctx: &ActionContext) -> Result<()> {
    let app_name = required(
        template.destination.as_ref(),
        |d| d.app.as_ref(),
        "app",
        ResourceKind::DeploymentTemplate,
    )?;
    let app = ctx
        .collaborators
        .apps
        .find_active_by_name(app_name)
        .await
        .map_err(resolve_err("app", app_name))?;

    let chart = ctx
        .collaborators
        .charts
        .create(TemplateRequest {
            app_id: app.id,
            chart_ref_id: template.chart_ref_id,
            ref_chart_template: template.ref_chart_template.clone(),
            ref_chart_template_version: template.ref_chart_template_version.clone(),
            values_override: template.values_override.clone().unwrap_or_else(|| json!({})),
            default_app_override: template.default_app_override.clone().filter(|v| !v.is_null()),
            is_app_metrics_enabled: template.is_app_metrics_enabled,
        })
        .await?;

    info!(app = %app_name, chart_id = chart.id, "Deployment template created");
    Ok(())
}
