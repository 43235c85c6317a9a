// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bulk (chart-group) installs.
//!
//! All items share one DB-phase transaction, written in submission order.
//! After commit every item is published to the durable stream and the
//! deploy stage runs later in a [`consumer::BulkInstallConsumer`]. Items
//! progress independently once they are on the stream.

pub mod consumer;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{error, info};

use crate::collaborators::MessageStream;
use crate::config::BulkStreamConfig;
use crate::install::{
    InstallAppVersionDto, InstallAppVersionRequest, InstallError, InstallService, InstallStatus,
    Result,
};
use crate::persistence::NewChartGroupDeployment;

pub use consumer::{BulkInstallConsumer, Disposition};

/// One chart of a bulk install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallChartItem {
    pub app_name: String,
    pub app_store_version_id: i64,
    pub environment_id: i64,
    #[serde(default)]
    pub values_override_yaml: String,
    #[serde(default)]
    pub reference_value_id: Option<i64>,
    #[serde(default)]
    pub reference_value_kind: Option<String>,
    #[serde(default)]
    pub chart_group_entry_id: Option<i64>,
}

/// A bulk install submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkInstallRequest {
    pub project_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub chart_group_id: Option<i64>,
    pub items: Vec<InstallChartItem>,
}

impl BulkInstallRequest {
    /// Per-item install requests, in submission order.
    pub fn install_requests(&self) -> Vec<InstallAppVersionRequest> {
        self.items
            .iter()
            .map(|item| InstallAppVersionRequest {
                app_name: item.app_name.clone(),
                app_store_version_id: item.app_store_version_id,
                environment_id: Some(item.environment_id),
                cluster_id: 0,
                namespace: String::new(),
                values_override_yaml: item.values_override_yaml.clone(),
                reference_value_id: item.reference_value_id,
                reference_value_kind: item.reference_value_kind.clone(),
                user_id: self.user_id,
                team_id: Some(self.project_id),
                deployment_app_type: None,
                chart_group_entry_id: item.chart_group_entry_id,
            })
            .collect()
    }

    fn chart_group(&self) -> Option<i64> {
        self.chart_group_id.filter(|id| *id > 0)
    }
}

/// Message published per item; the consumer runs the deploy stage for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployStageMessage {
    pub installed_app_version_id: i64,
    pub installed_app_version_history_id: i64,
}

impl DeployStageMessage {
    /// Stream message id, used for publish-side deduplication.
    pub fn msg_id(&self) -> String {
        format!(
            "{}-{}",
            self.installed_app_version_id, self.installed_app_version_history_id
        )
    }
}

/// Result of one item after publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkInstallItem {
    pub dto: InstallAppVersionDto,
    /// `ENQUEUED`, or `QUE_ERROR` when the publish failed.
    pub status: InstallStatus,
}

/// Result of a bulk install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkInstallResult {
    /// Set when the submission belongs to a chart group.
    pub group_installation_id: Option<String>,
    pub items: Vec<BulkInstallItem>,
}

/// Lowercase hex sha1 over the decimal app ids, concatenated in order.
pub fn group_installation_id<I>(app_ids: I) -> Result<String>
where
    I: IntoIterator<Item = Option<i64>>,
{
    let mut hasher = Sha1::new();
    for app_id in app_ids {
        let app_id = app_id
            .filter(|id| *id > 0)
            .ok_or_else(|| InstallError::bad_request("app ID not present", "app ID not present"))?;
        hasher.update(app_id.to_string().as_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Runs the bulk DB phase and hands every item to the stream.
#[derive(Clone)]
pub struct BulkInstaller {
    service: InstallService,
    stream: Arc<dyn MessageStream>,
    config: BulkStreamConfig,
}

impl BulkInstaller {
    pub fn new(
        service: InstallService,
        stream: Arc<dyn MessageStream>,
        config: BulkStreamConfig,
    ) -> Self {
        Self {
            service,
            stream,
            config,
        }
    }

    /// Write every item in one transaction, then enqueue them.
    ///
    /// Any DB-phase failure rolls the whole submission back. Publish
    /// failures only affect their own item, which is left in `QUE_ERROR`.
    pub async fn install(&self, request: &BulkInstallRequest) -> Result<BulkInstallResult> {
        let requests = request.install_requests();
        let store = self.service.store().clone();

        let mut tx = store.begin().await?;
        let mut dtos = Vec::with_capacity(requests.len());
        for item in &requests {
            match self.service.app_store_deploy_operation_db(item, tx.as_mut()).await {
                Ok(dto) => dtos.push(dto),
                Err(e) => {
                    tx.rollback().await?;
                    error!(app = %item.app_name, error = %e, "Bulk install rolled back");
                    return Err(e);
                }
            }
        }

        let group_installation_id = match request.chart_group() {
            Some(chart_group_id) => {
                let group_id = match group_installation_id(dtos.iter().map(|d| Some(d.app_id))) {
                    Ok(id) => id,
                    Err(e) => {
                        tx.rollback().await?;
                        return Err(e);
                    }
                };
                for dto in &dtos {
                    let inserted = tx
                        .insert_chart_group_deployment(&NewChartGroupDeployment {
                            chart_group_id,
                            chart_group_entry_id: dto.chart_group_entry_id,
                            installed_app_id: dto.installed_app_id,
                            group_installation_id: group_id.clone(),
                            created_by: request.user_id,
                        })
                        .await;
                    if let Err(e) = inserted {
                        tx.rollback().await?;
                        return Err(e.into());
                    }
                }
                Some(group_id)
            }
            None => None,
        };
        tx.commit().await?;

        let mut items = Vec::with_capacity(dtos.len());
        for dto in dtos {
            let status = self.enqueue(&dto).await?;
            items.push(BulkInstallItem { dto, status });
        }

        info!(
            items = items.len(),
            chart_group_id = request.chart_group(),
            group_installation_id = group_installation_id.as_deref().unwrap_or(""),
            "Bulk install submitted"
        );
        Ok(BulkInstallResult {
            group_installation_id,
            items,
        })
    }

    async fn enqueue(&self, dto: &InstallAppVersionDto) -> Result<InstallStatus> {
        let message = DeployStageMessage {
            installed_app_version_id: dto.installed_app_version_id,
            installed_app_version_history_id: dto.installed_app_version_history_id,
        };
        let payload = serde_json::to_string(&message)?;
        let published = self
            .stream
            .publish(
                &self.config.stream,
                &self.config.subject,
                &payload,
                &message.msg_id(),
            )
            .await;

        let status = match published {
            Ok(()) => InstallStatus::Enqueued,
            Err(e) => {
                error!(
                    installed_app_id = dto.installed_app_id,
                    error = %e,
                    "Failed to publish bulk install message"
                );
                InstallStatus::QueError
            }
        };
        self.service.transition(dto.installed_app_id, status).await?;
        Ok(status)
    }
}
