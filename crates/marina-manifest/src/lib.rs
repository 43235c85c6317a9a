// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Marina manifest - declarative app definitions.
//!
//! This crate is the pure half of marina. It knows the shape of an app
//! manifest and everything that can be decided about one without talking to
//! a database or a cluster:
//!
//! - [`path`]: resource paths, operation verbs and path arithmetic
//! - [`model`]: the node types (app, workflow, build, deployment, template,
//!   configmap/secret, task, stage)
//! - [`inherit`]: filling unset props from enclosing containers
//! - [`validation`]: per-kind check lists with accumulated errors
//! - [`transform`]: docker arguments, task scripts, stage documents and
//!   strategies in the shapes downstream services accept
//!
//! ```text
//! JSON ──parse──▶ App ──validate (inherit + checks)──▶ canonical App ──dispatch──▶ marina-core
//! ```
//!
//! Nothing here performs I/O.

// Paths and verbs
pub mod path;

// Node types
pub mod model;

// Property inheritance
pub mod inherit;

// Validation checks and error catalogue
pub mod validation;

// Pure transformations used by the dispatcher
pub mod transform;

pub use inherit::{Holder, Inheritable, inherit};
pub use model::{
    API_VERSION_V1, App, Build, DataHolder, Deployment, DeploymentStrategy, DeploymentTemplate,
    Pipeline, PipelineRef, ResourceKind, Stage, Task, Workflow, parse_app,
};
pub use path::{InheritedProps, Operation, PathField, ResourcePath, Trigger, equal, merge_inherited};
pub use transform::TransformError;
pub use validation::{ValidationError, ValidationErrors, validate_app};
