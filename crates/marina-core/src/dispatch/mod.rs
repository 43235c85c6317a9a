// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Action dispatcher.
//!
//! Walks a validated manifest and turns each node's operation verb into
//! calls on the collaborators. Every kind has its own executor:
//!
//! - [`app`]: container; runs configmaps, secrets and workflows
//! - [`workflow`]: workflow records, then builds before deployments
//! - [`build`]: CI pipelines
//! - [`deployment`]: CD pipelines, their data holders and template
//! - [`data_holder`]: configmaps and secrets
//! - [`template`]: deployment templates
//! - [`task`]: pre/post scripts
//!
//! Executors fill missing props from their parent first, then run the
//! handler for the node's operation. Sibling failures are collected and
//! returned together; a parent runs its children only after its own side
//! effect succeeded.

pub mod app;
pub mod build;
pub mod data_holder;
pub mod deployment;
pub mod task;
pub mod template;
pub mod workflow;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use marina_manifest::{
    App, Operation, ResourceKind, ResourcePath, TransformError, ValidationError, ValidationErrors,
    parse_app, validate_app,
};

use crate::collaborators::{CollaboratorError, Collaborators};

/// Everything a handler needs besides the node itself.
#[derive(Clone)]
pub struct ActionContext {
    pub collaborators: Collaborators,
    /// Caller on whose behalf the manifest is applied.
    pub user_id: i64,
    pub cancel: CancellationToken,
}

impl ActionContext {
    pub fn new(collaborators: Collaborators, user_id: i64) -> Self {
        Self {
            collaborators,
            user_id,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ActionError::Cancelled);
        }
        Ok(())
    }
}

/// Dispatcher errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ActionError {
    /// The manifest failed validation; nothing was executed.
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    /// A named entity could not be resolved or a node is incomplete.
    #[error("{0}")]
    Resolution(String),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// The manifest document itself could not be read.
    #[error("invalid manifest: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cancelled")]
    Cancelled,

    /// Failures of sibling nodes, one per line.
    #[error("{}", join_errors(.0))]
    Aggregate(Vec<ActionError>),
}

fn join_errors(errors: &[ActionError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Result type for dispatcher operations.
pub type Result<T> = std::result::Result<T, ActionError>;

/// Collects sibling failures.
#[derive(Debug, Default)]
pub(crate) struct Errors(Vec<ActionError>);

impl Errors {
    pub(crate) fn record(&mut self, result: Result<()>) {
        match result {
            Ok(()) => {}
            Err(ActionError::Aggregate(errors)) => self.0.extend(errors),
            Err(e) => self.0.push(e),
        }
    }

    pub(crate) fn into_result(mut self) -> Result<()> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(self.0.remove(0)),
            _ => Err(ActionError::Aggregate(self.0)),
        }
    }
}

/// Error for an operation the kind has no handler for.
pub(crate) fn unhandled(operation: Option<Operation>, kind: ResourceKind) -> ActionError {
    match operation {
        None | Some(Operation::Undefined) => ValidationError::OperationUndefined { kind }.into(),
        Some(operation) => ValidationError::OperationUnimplemented { operation, kind }.into(),
    }
}

/// A coordinate the handler cannot work without.
pub(crate) fn required<'a>(
    path: Option<&'a ResourcePath>,
    value: impl Fn(&'a ResourcePath) -> Option<&'a String>,
    what: &str,
    kind: ResourceKind,
) -> Result<&'a str> {
    path.and_then(value)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ActionError::Resolution(format!("{} cannot be empty for {}", what, kind)))
}

/// Map a lookup failure: a missing entity is a resolution error, anything
/// else is passed through.
pub(crate) fn resolve_err(what: &str, name: &str) -> impl FnOnce(CollaboratorError) -> ActionError {
    let label = format!("{} {}", what, name);
    move |e| {
        if e.is_not_found() {
            ActionError::Resolution(format!("{} not found", label))
        } else {
            ActionError::Collaborator(e)
        }
    }
}

/// Parse, validate and execute a manifest. Returns the canonical
/// (prop-inherited) app; validation failures abort before any side effect.
pub async fn apply(manifest: &str, ctx: &ActionContext) -> Result<App> {
    let mut app = parse_app(manifest)?;
    validate_app(&mut app)?;
    app::execute(&mut app, ctx).await?;
    info!(
        user_id = ctx.user_id,
        app = app.destination.as_ref().and_then(|d| d.app.as_deref()).unwrap_or_default(),
        "Manifest applied"
    );
    Ok(app)
}
