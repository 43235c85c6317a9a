// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! App executor. An app is a pure container: it has no side effect of its
//! own and hands its props to every child.

use tracing::debug;

use marina_manifest::{App, Inheritable, Operation, ResourceKind};

use super::{ActionContext, Errors, Result, data_holder, unhandled, workflow};

pub async fn execute(app: &mut App, ctx: &ActionContext) -> Result<()> {
    ctx.ensure_active()?;
    let operation = match app.operation {
        Some(Operation::Undefined) | None => return Err(unhandled(app.operation, ResourceKind::App)),
        Some(operation) => operation,
    };
    let props = app.inherited_props();
    let mut errors = Errors::default();

    if operation == Operation::Delete {
        // Tear down in reverse: workflows, secrets, configmaps.
        for wf in app.workflows.iter_mut().rev() {
            errors.record(workflow::execute(wf, &props, ctx).await);
        }
        for holder in app.secrets.iter_mut() {
            errors.record(data_holder::execute(holder, ResourceKind::Secret, &props, ctx).await);
        }
        for holder in app.config_maps.iter_mut() {
            errors.record(data_holder::execute(holder, ResourceKind::ConfigMap, &props, ctx).await);
        }
    } else {
        for holder in app.config_maps.iter_mut() {
            errors.record(data_holder::execute(holder, ResourceKind::ConfigMap, &props, ctx).await);
        }
        for holder in app.secrets.iter_mut() {
            errors.record(data_holder::execute(holder, ResourceKind::Secret, &props, ctx).await);
        }
        for wf in app.workflows.iter_mut() {
            errors.record(workflow::execute(wf, &props, ctx).await);
        }
    }

    debug!(
        operation = %operation,
        workflows = app.workflows.len(),
        config_maps = app.config_maps.len(),
        secrets = app.secrets.len(),
        "App children dispatched"
    );
    errors.into_result()
}
