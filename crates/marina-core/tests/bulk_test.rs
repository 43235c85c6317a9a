// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bulk install tests: one DB-phase transaction, per-item publish and the
//! competing consumer running the deploy stage.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;
use marina_core::bulk::{
    BulkInstallConsumer, BulkInstallRequest, BulkInstaller, DeployStageMessage, Disposition,
    InstallChartItem, group_installation_id,
};
use marina_core::collaborators::{InMemoryStream, MessageStream};
use marina_core::config::BulkStreamConfig;
use marina_core::install::InstallStatus;
use marina_core::persistence::InstallStore;

struct BulkHarness {
    ctx: TestContext,
    stream: Arc<InMemoryStream>,
    config: BulkStreamConfig,
    installer: BulkInstaller,
}

impl BulkHarness {
    async fn new() -> Self {
        let ctx = TestContext::new().await;
        let stream = Arc::new(InMemoryStream::new());
        let config = BulkStreamConfig::default();
        stream.add_stream(&config.stream).await;
        let installer = BulkInstaller::new(ctx.service.clone(), stream.clone(), config.clone());
        Self {
            ctx,
            stream,
            config,
            installer,
        }
    }

    fn consumer(&self) -> BulkInstallConsumer {
        BulkInstallConsumer::new(self.ctx.service.clone(), self.stream.clone(), self.config.clone())
    }

    fn item(&self, app_name: &str, entry: Option<i64>) -> InstallChartItem {
        InstallChartItem {
            app_name: app_name.to_string(),
            app_store_version_id: REDIS_VERSION_ID,
            environment_id: self.ctx.environment.id,
            values_override_yaml: REDIS_VALUES.to_string(),
            reference_value_id: None,
            reference_value_kind: None,
            chart_group_entry_id: entry,
        }
    }

    fn request(&self, chart_group_id: Option<i64>, items: Vec<InstallChartItem>) -> BulkInstallRequest {
        BulkInstallRequest {
            project_id: 1,
            user_id: USER_ID,
            chart_group_id,
            items,
        }
    }

    async fn published(&self) -> Vec<(String, String)> {
        self.stream
            .published(&self.config.stream, &self.config.subject)
            .await
    }
}

/// Poll until the installed app reaches `expected`.
async fn wait_for_status(ctx: &TestContext, installed_app_id: i64, expected: InstallStatus) {
    for _ in 0..200 {
        if ctx.status(installed_app_id).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "installed app {} never reached {}, last status {}",
        installed_app_id,
        expected,
        ctx.status(installed_app_id).await
    );
}

// ============================================================================
// Submission
// ============================================================================

#[tokio::test]
async fn test_chart_group_install_enqueues_every_item() {
    let harness = BulkHarness::new().await;
    let request = harness.request(
        Some(5),
        vec![harness.item("redis", Some(1)), harness.item("cache", Some(2))],
    );

    let result = harness.installer.install(&request).await.unwrap();

    assert_eq!(result.items.len(), 2);
    for item in &result.items {
        assert_eq!(item.status, InstallStatus::Enqueued);
        assert_eq!(harness.ctx.status(item.dto.installed_app_id).await, InstallStatus::Enqueued);
    }

    let expected_group =
        group_installation_id(result.items.iter().map(|i| Some(i.dto.app_id))).unwrap();
    assert_eq!(result.group_installation_id.as_deref(), Some(expected_group.as_str()));

    let deployments = harness
        .ctx
        .store
        .list_chart_group_deployments(&expected_group)
        .await
        .unwrap();
    assert_eq!(deployments.len(), 2);
    assert!(deployments.iter().all(|d| d.chart_group_id == 5 && !d.deleted));
    let entries: Vec<Option<i64>> = deployments.iter().map(|d| d.chart_group_entry_id).collect();
    assert_eq!(entries, vec![Some(1), Some(2)]);

    let published = harness.published().await;
    assert_eq!(published.len(), 2);
    let first = &result.items[0].dto;
    let message: DeployStageMessage = serde_json::from_str(&published[0].1).unwrap();
    assert_eq!(message.installed_app_version_id, first.installed_app_version_id);
    assert_eq!(
        message.installed_app_version_history_id,
        first.installed_app_version_history_id
    );
    assert_eq!(published[0].0, message.msg_id());
}

#[tokio::test]
async fn test_install_without_chart_group_has_no_group_id() {
    let harness = BulkHarness::new().await;
    let request = harness.request(Some(0), vec![harness.item("redis", None)]);

    let result = harness.installer.install(&request).await.unwrap();

    assert!(result.group_installation_id.is_none());
    assert_eq!(result.items[0].status, InstallStatus::Enqueued);
}

#[tokio::test]
async fn test_publish_failure_marks_item_que_error() {
    let harness = BulkHarness::new().await;
    harness.stream.set_publish_failing(true);
    let request = harness.request(None, vec![harness.item("redis", None)]);

    let result = harness.installer.install(&request).await.unwrap();

    let dto = &result.items[0].dto;
    assert_eq!(result.items[0].status, InstallStatus::QueError);
    assert_eq!(harness.ctx.status(dto.installed_app_id).await, InstallStatus::QueError);
    assert!(harness.published().await.is_empty());

    // A queued item that never reached the stream can still be deployed.
    let status = harness
        .ctx
        .service
        .perform_deploy_stage(
            dto.installed_app_version_id,
            dto.installed_app_version_history_id,
            &tokio_util::sync::CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(status, InstallStatus::DeploySuccess);
}

#[tokio::test]
async fn test_db_phase_failure_rolls_back_every_item() {
    let harness = BulkHarness::new().await;
    let mut broken = harness.item("cache", None);
    broken.app_store_version_id = 999;
    let request = harness.request(Some(5), vec![harness.item("redis", None), broken]);

    let err = harness.installer.install(&request).await.unwrap_err();

    assert_eq!(err.status_code(), 404);
    assert!(harness.ctx.store.get_installed_app(1).await.unwrap().is_none());
    assert!(harness.published().await.is_empty());
}

// ============================================================================
// Consumer
// ============================================================================

#[tokio::test]
async fn test_consumer_runs_deploy_stage_and_acks() {
    let harness = BulkHarness::new().await;
    let result = harness
        .installer
        .install(&harness.request(None, vec![harness.item("redis", None)]))
        .await
        .unwrap();
    let installed_app_id = result.items[0].dto.installed_app_id;

    let consumer = harness.consumer();
    let shutdown = consumer.shutdown_handle();
    let handle = tokio::spawn(consumer.run());

    wait_for_status(&harness.ctx, installed_app_id, InstallStatus::DeploySuccess).await;
    for _ in 0..200 {
        if !harness
            .stream
            .acked(&harness.config.stream, &harness.config.durable)
            .await
            .is_empty()
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown.notify_one();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("consumer did not stop")
        .unwrap();

    assert_eq!(
        harness
            .stream
            .acked(&harness.config.stream, &harness.config.durable)
            .await,
        vec![1]
    );
    assert!(harness.ctx.mocks.argo.apps.lock().await.contains_key("redis-dev"));
}

#[tokio::test]
async fn test_consumer_stops_when_stream_closes() {
    let harness = BulkHarness::new().await;
    let consumer = harness.consumer();
    let handle = tokio::spawn(consumer.run());

    tokio::time::sleep(Duration::from_millis(20)).await;
    harness.stream.close(&harness.config.stream).await;

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("consumer did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_redelivered_message_is_idempotent() {
    let harness = BulkHarness::new().await;
    let consumer = harness.consumer();
    let mut subscription = consumer.subscribe().await.unwrap();
    let result = harness
        .installer
        .install(&harness.request(None, vec![harness.item("redis", None)]))
        .await
        .unwrap();
    let installed_app_id = result.items[0].dto.installed_app_id;

    let delivery = subscription.next().await.unwrap().unwrap();
    let disposition = consumer.handle_delivery(subscription.as_mut(), &delivery).await;
    assert_eq!(disposition, Disposition::Acked);
    let history = harness
        .ctx
        .store
        .list_history_for_installed_app(installed_app_id)
        .await
        .unwrap();
    let syncs = harness.ctx.mocks.argo.syncs.lock().await.len();

    // The same message again finds the install deployed and changes nothing.
    let disposition = consumer.handle_delivery(subscription.as_mut(), &delivery).await;

    assert_eq!(disposition, Disposition::Acked);
    assert_eq!(
        harness.ctx.status(installed_app_id).await,
        InstallStatus::DeploySuccess
    );
    assert_eq!(
        harness
            .ctx
            .store
            .list_history_for_installed_app(installed_app_id)
            .await
            .unwrap(),
        history
    );
    assert_eq!(harness.ctx.mocks.argo.syncs.lock().await.len(), syncs);
}

#[tokio::test]
async fn test_failed_stage_is_acked_with_error_status() {
    let harness = BulkHarness::new().await;
    let consumer = harness.consumer();
    let mut subscription = consumer.subscribe().await.unwrap();
    harness
        .ctx
        .mocks
        .git
        .fail_create_repo
        .store(true, Ordering::SeqCst);
    let result = harness
        .installer
        .install(&harness.request(None, vec![harness.item("redis", None)]))
        .await
        .unwrap();

    let delivery = subscription.next().await.unwrap().unwrap();
    let disposition = consumer.handle_delivery(subscription.as_mut(), &delivery).await;

    assert_eq!(disposition, Disposition::Acked);
    assert_eq!(
        harness.ctx.status(result.items[0].dto.installed_app_id).await,
        InstallStatus::GitError
    );
    assert!(
        harness
            .stream
            .pending(&harness.config.stream, &harness.config.durable)
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn test_cancelled_stage_is_left_for_redelivery() {
    let harness = BulkHarness::new().await;
    let consumer = harness.consumer();
    let mut subscription = consumer.subscribe().await.unwrap();
    let result = harness
        .installer
        .install(&harness.request(None, vec![harness.item("redis", None)]))
        .await
        .unwrap();
    consumer.cancel_token().cancel();

    let delivery = subscription.next().await.unwrap().unwrap();
    let disposition = consumer.handle_delivery(subscription.as_mut(), &delivery).await;

    assert_eq!(disposition, Disposition::Unacked);
    assert_eq!(
        harness.ctx.status(result.items[0].dto.installed_app_id).await,
        InstallStatus::Enqueued
    );
    assert_eq!(
        harness
            .stream
            .pending(&harness.config.stream, &harness.config.durable)
            .await,
        vec![delivery.sequence]
    );
}

#[tokio::test]
async fn test_acd_resume_failure_settles_before_ack() {
    let harness = BulkHarness::new().await;
    let consumer = harness.consumer();
    let mut subscription = consumer.subscribe().await.unwrap();
    let result = harness
        .installer
        .install(&harness.request(None, vec![harness.item("redis", None)]))
        .await
        .unwrap();
    let dto = &result.items[0].dto;
    // An earlier attempt pushed the chart and stopped before the ACD phase.
    assert!(
        harness
            .ctx
            .store
            .update_status(dto.installed_app_id, InstallStatus::GitSuccess)
            .await
            .unwrap()
    );
    harness.ctx.mocks.git.fail_repo_url.store(true, Ordering::SeqCst);

    let delivery = subscription.next().await.unwrap().unwrap();
    let disposition = consumer.handle_delivery(subscription.as_mut(), &delivery).await;

    assert_eq!(disposition, Disposition::Acked);
    assert_eq!(harness.ctx.status(dto.installed_app_id).await, InstallStatus::AcdError);
    let history = harness
        .ctx
        .store
        .get_history(dto.installed_app_version_history_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(history.status, "Failed");
    assert!(harness.ctx.mocks.argo.syncs.lock().await.is_empty());
}

#[tokio::test]
async fn test_message_for_removed_install_is_dropped() {
    let harness = BulkHarness::new().await;
    let consumer = harness.consumer();
    let mut subscription = consumer.subscribe().await.unwrap();
    let message = DeployStageMessage {
        installed_app_version_id: 404,
        installed_app_version_history_id: 404,
    };
    harness
        .stream
        .publish(
            &harness.config.stream,
            &harness.config.subject,
            &serde_json::to_string(&message).unwrap(),
            &message.msg_id(),
        )
        .await
        .unwrap();

    let delivery = subscription.next().await.unwrap().unwrap();
    let disposition = consumer.handle_delivery(subscription.as_mut(), &delivery).await;

    assert_eq!(disposition, Disposition::Dropped);
    assert!(
        harness
            .stream
            .pending(&harness.config.stream, &harness.config.durable)
            .await
            .is_empty()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_stages_journal_values_once() {
    let harness = BulkHarness::new().await;
    let result = harness
        .installer
        .install(&harness.request(None, vec![harness.item("redis", None)]))
        .await
        .unwrap();
    let dto = &result.items[0].dto;

    let cancel = tokio_util::sync::CancellationToken::new();
    let stage = || {
        harness.ctx.service.perform_deploy_stage(
            dto.installed_app_version_id,
            dto.installed_app_version_history_id,
            &cancel,
        )
    };
    let (first, second) = tokio::join!(stage(), stage());

    assert_eq!(first.unwrap(), InstallStatus::DeploySuccess);
    assert_eq!(second.unwrap(), InstallStatus::DeploySuccess);
    let history = harness
        .ctx
        .store
        .list_history_for_installed_app(dto.installed_app_id)
        .await
        .unwrap();
    // The queued row plus one deployed-values row.
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|row| row.status == "Succeeded"));
}

#[tokio::test]
async fn test_undecodable_message_is_dropped() {
    let harness = BulkHarness::new().await;
    let consumer = harness.consumer();
    let mut subscription = consumer.subscribe().await.unwrap();
    harness
        .stream
        .publish(&harness.config.stream, &harness.config.subject, "not json", "bad-1")
        .await
        .unwrap();

    let delivery = subscription.next().await.unwrap().unwrap();
    let disposition = consumer.handle_delivery(subscription.as_mut(), &delivery).await;

    assert_eq!(disposition, Disposition::Dropped);
    assert_eq!(
        harness
            .stream
            .acked(&harness.config.stream, &harness.config.durable)
            .await,
        vec![delivery.sequence]
    );
}

#[tokio::test]
async fn test_items_deploy_independently() {
    let harness = BulkHarness::new().await;
    let result = harness
        .installer
        .install(&harness.request(
            Some(5),
            vec![harness.item("redis", Some(1)), harness.item("cache", Some(2))],
        ))
        .await
        .unwrap();

    let cancel = tokio_util::sync::CancellationToken::new();
    let stages = result.items.iter().map(|item| {
        harness.ctx.service.perform_deploy_stage(
            item.dto.installed_app_version_id,
            item.dto.installed_app_version_history_id,
            &cancel,
        )
    });
    let outcomes = futures::future::join_all(stages).await;

    for outcome in outcomes {
        assert_eq!(outcome.unwrap(), InstallStatus::DeploySuccess);
    }
    let mut syncs = harness.ctx.mocks.argo.syncs.lock().await.clone();
    syncs.sort();
    assert_eq!(syncs, vec!["cache-dev".to_string(), "redis-dev".to_string()]);
}
