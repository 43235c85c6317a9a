// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! External collaborators.
//!
//! - [`traits`]: the contracts marina drives
//! - [`stream`]: the durable message stream used by bulk installs
//! - [`mock`]: in-memory implementations for tests and local runs

pub mod mock;
pub mod stream;
pub mod traits;

use std::sync::Arc;

pub use mock::MockCollaborators;
pub use stream::{Delivery, InMemoryStream, MessageStream, SubscribeOptions, Subscription};
pub use traits::*;

/// Handles to every collaborator the dispatcher and the install pipeline use.
#[derive(Clone)]
pub struct Collaborators {
    pub apps: Arc<dyn AppRepository>,
    pub environments: Arc<dyn EnvironmentService>,
    pub workflows: Arc<dyn WorkflowRepository>,
    pub ci: Arc<dyn CiPipelineService>,
    pub cd: Arc<dyn CdPipelineService>,
    pub config_maps: Arc<dyn ConfigMapService>,
    pub charts: Arc<dyn ChartService>,
    pub git: Arc<dyn GitService>,
    pub gitops: Arc<dyn GitOpsConfigReader>,
    pub argo: Arc<dyn ArgoClient>,
    pub helm: Arc<dyn HelmClient>,
    pub app_store: Arc<dyn AppStoreCatalog>,
    pub users: Arc<dyn UserService>,
}
