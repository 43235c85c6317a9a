// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Competing consumer for bulk install messages.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collaborators::{
    CollaboratorResult, Delivery, MessageStream, SubscribeOptions, Subscription,
};
use crate::config::BulkStreamConfig;
use crate::install::{InstallError, InstallService};

use super::DeployStageMessage;

/// Pause after a failed receive before asking the stream again.
const RECEIVE_BACKOFF: Duration = Duration::from_millis(500);

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The install holds a settled status; the message is done.
    Acked,
    /// The payload could not be decoded or names a removed install;
    /// acknowledged and discarded.
    Dropped,
    /// Left pending so the stream hands it out again.
    Unacked,
}

/// Pulls deploy-stage messages and runs the stage for each.
pub struct BulkInstallConsumer {
    service: InstallService,
    stream: Arc<dyn MessageStream>,
    config: BulkStreamConfig,
    shutdown: Arc<Notify>,
    cancel: CancellationToken,
}

impl BulkInstallConsumer {
    pub fn new(
        service: InstallService,
        stream: Arc<dyn MessageStream>,
        config: BulkStreamConfig,
    ) -> Self {
        Self {
            service,
            stream,
            config,
            shutdown: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Token handed to every deploy stage this consumer runs.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Bind the durable queue subscription.
    pub async fn subscribe(&self) -> CollaboratorResult<Box<dyn Subscription>> {
        let options = SubscribeOptions {
            durable: self.config.durable.clone(),
            deliver_last: true,
            manual_ack: true,
            bind_stream: true,
        };
        self.stream
            .queue_subscribe(
                &self.config.stream,
                &self.config.subject,
                &self.config.durable,
                options,
            )
            .await
    }

    /// Run the consumer loop until shutdown or until the stream closes.
    pub async fn run(self) {
        let mut subscription = match self.subscribe().await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(
                    stream = %self.config.stream,
                    durable = %self.config.durable,
                    error = %e,
                    "Bulk install consumer could not subscribe"
                );
                return;
            }
        };
        info!(
            stream = %self.config.stream,
            subject = %self.config.subject,
            durable = %self.config.durable,
            "Bulk install consumer started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Bulk install consumer shutting down");
                    self.cancel.cancel();
                    break;
                }
                next = subscription.next() => match next {
                    Ok(Some(delivery)) => {
                        self.handle_delivery(subscription.as_mut(), &delivery).await;
                    }
                    Ok(None) => {
                        info!("Bulk install stream closed");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to receive bulk install message");
                        tokio::time::sleep(RECEIVE_BACKOFF).await;
                    }
                }
            }
        }
    }

    /// Run the deploy stage for one delivery. The message is acknowledged
    /// once the install holds a settled status; an interrupted or unsettled
    /// stage leaves it pending for redelivery.
    pub async fn handle_delivery(
        &self,
        subscription: &mut dyn Subscription,
        delivery: &Delivery,
    ) -> Disposition {
        let message: DeployStageMessage = match serde_json::from_str(&delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(msg_id = %delivery.msg_id, error = %e, "Dropping undecodable bulk install message");
                return ack(subscription, delivery, Disposition::Dropped).await;
            }
        };
        let version_id = message.installed_app_version_id;

        let outcome = self
            .service
            .perform_deploy_stage(
                version_id,
                message.installed_app_version_history_id,
                &self.cancel,
            )
            .await;
        let failure = match outcome {
            Ok(status) => {
                debug!(
                    installed_app_version_id = version_id,
                    status = %status,
                    attempt = delivery.attempt,
                    "Deploy stage finished"
                );
                return ack(subscription, delivery, Disposition::Acked).await;
            }
            Err(e @ (InstallError::Database(_) | InstallError::Cancelled)) => {
                warn!(
                    installed_app_version_id = version_id,
                    error = %e,
                    "Deploy stage interrupted, leaving message for redelivery"
                );
                return Disposition::Unacked;
            }
            Err(e) => e,
        };

        match self.service.deploy_stage_status(version_id).await {
            Ok(Some(status)) if status.is_settled() => {
                error!(
                    installed_app_version_id = version_id,
                    status = %status,
                    error = %failure,
                    "Deploy stage failed"
                );
                ack(subscription, delivery, Disposition::Acked).await
            }
            Ok(Some(status)) => {
                warn!(
                    installed_app_version_id = version_id,
                    status = %status,
                    error = %failure,
                    "Deploy stage failed without settling, leaving message for redelivery"
                );
                Disposition::Unacked
            }
            Ok(None) => {
                warn!(
                    installed_app_version_id = version_id,
                    error = %failure,
                    "Dropping bulk install message for a removed install"
                );
                ack(subscription, delivery, Disposition::Dropped).await
            }
            Err(e) => {
                warn!(
                    installed_app_version_id = version_id,
                    error = %e,
                    "Could not read install status, leaving message for redelivery"
                );
                Disposition::Unacked
            }
        }
    }
}

async fn ack(
    subscription: &mut dyn Subscription,
    delivery: &Delivery,
    disposition: Disposition,
) -> Disposition {
    match subscription.ack(delivery).await {
        Ok(()) => disposition,
        Err(e) => {
            warn!(msg_id = %delivery.msg_id, error = %e, "Failed to ack bulk install message");
            Disposition::Unacked
        }
    }
}
