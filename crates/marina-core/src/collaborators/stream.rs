// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable message stream contract and an in-memory implementation.
//!
//! Delivery is at least once. Subscribers sharing a durable name compete for
//! messages; a message stays pending until acknowledged and is handed out
//! again once its pending state expires.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use super::traits::{CollaboratorError, CollaboratorResult};

/// Options of a queue subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Durable consumer name; keeps the cursor across restarts.
    pub durable: String,
    /// A newly created consumer starts at the last message of the stream.
    pub deliver_last: bool,
    /// Messages must be acknowledged explicitly.
    pub manual_ack: bool,
    /// Bind to an existing stream instead of creating one.
    pub bind_stream: bool,
}

/// One message handed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub sequence: u64,
    pub msg_id: String,
    pub subject: String,
    pub payload: String,
    /// 1 on first delivery.
    pub attempt: u32,
}

#[async_trait]
pub trait MessageStream: Send + Sync {
    /// Publish a message. A repeated `msg_id` is deduplicated.
    async fn publish(
        &self,
        stream: &str,
        subject: &str,
        payload: &str,
        msg_id: &str,
    ) -> CollaboratorResult<()>;

    async fn queue_subscribe(
        &self,
        stream: &str,
        subject: &str,
        group: &str,
        options: SubscribeOptions,
    ) -> CollaboratorResult<Box<dyn Subscription>>;
}

#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message. `None` once the subscription is closed.
    async fn next(&mut self) -> CollaboratorResult<Option<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> CollaboratorResult<()>;
}

// ============================================================================
// In-memory stream
// ============================================================================

#[derive(Debug, Clone)]
struct StoredMessage {
    sequence: u64,
    subject: String,
    msg_id: String,
    payload: String,
}

#[derive(Debug, Default)]
struct ConsumerState {
    subject: String,
    /// Index into the message log of the next fresh message.
    cursor: usize,
    pending: HashMap<u64, u32>,
    redeliver: VecDeque<u64>,
    acked: BTreeSet<u64>,
}

#[derive(Debug, Default)]
struct StreamState {
    messages: Vec<StoredMessage>,
    seen_ids: HashSet<String>,
    consumers: HashMap<String, ConsumerState>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    streams: Mutex<HashMap<String, StreamState>>,
    notify: Notify,
    publish_failing: std::sync::atomic::AtomicBool,
}

/// Process-local durable stream.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStream {
    shared: Arc<Shared>,
}

impl InMemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail (or succeed again).
    pub fn set_publish_failing(&self, failing: bool) {
        self.shared
            .publish_failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Create an empty stream so consumers can bind before the first publish.
    pub async fn add_stream(&self, stream: &str) {
        self.shared
            .streams
            .lock()
            .await
            .entry(stream.to_string())
            .or_default();
    }

    /// Payloads published on a subject, in order.
    pub async fn published(&self, stream: &str, subject: &str) -> Vec<(String, String)> {
        let streams = self.shared.streams.lock().await;
        streams
            .get(stream)
            .map(|s| {
                s.messages
                    .iter()
                    .filter(|m| m.subject == subject)
                    .map(|m| (m.msg_id.clone(), m.payload.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sequences still awaiting acknowledgement by a durable consumer.
    pub async fn pending(&self, stream: &str, durable: &str) -> Vec<u64> {
        let streams = self.shared.streams.lock().await;
        let mut pending: Vec<u64> = streams
            .get(stream)
            .and_then(|s| s.consumers.get(durable))
            .map(|c| c.pending.keys().copied().collect())
            .unwrap_or_default();
        pending.sort_unstable();
        pending
    }

    /// Sequences acknowledged by a durable consumer.
    pub async fn acked(&self, stream: &str, durable: &str) -> Vec<u64> {
        let streams = self.shared.streams.lock().await;
        streams
            .get(stream)
            .and_then(|s| s.consumers.get(durable))
            .map(|c| c.acked.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Expire every pending message of a consumer so it is delivered again,
    /// as an ack-wait timeout would.
    pub async fn expire_pending(&self, stream: &str, durable: &str) {
        let mut streams = self.shared.streams.lock().await;
        if let Some(consumer) = streams
            .get_mut(stream)
            .and_then(|s| s.consumers.get_mut(durable))
        {
            let mut expired: Vec<u64> = consumer.pending.keys().copied().collect();
            expired.sort_unstable();
            for sequence in expired {
                if !consumer.redeliver.contains(&sequence) {
                    consumer.redeliver.push_back(sequence);
                }
            }
        }
        drop(streams);
        self.shared.notify.notify_waiters();
    }

    /// Close every subscription of a stream.
    pub async fn close(&self, stream: &str) {
        let mut streams = self.shared.streams.lock().await;
        streams.entry(stream.to_string()).or_default().closed = true;
        drop(streams);
        self.shared.notify.notify_waiters();
    }
}

#[async_trait]
impl MessageStream for InMemoryStream {
    async fn publish(
        &self,
        stream: &str,
        subject: &str,
        payload: &str,
        msg_id: &str,
    ) -> CollaboratorResult<()> {
        if self
            .shared
            .publish_failing
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(CollaboratorError::Transport(format!(
                "publish to {} failed",
                subject
            )));
        }

        let mut streams = self.shared.streams.lock().await;
        let state = streams.entry(stream.to_string()).or_default();
        if !state.seen_ids.insert(msg_id.to_string()) {
            debug!(msg_id = %msg_id, "Duplicate message id, publish skipped");
            return Ok(());
        }
        let sequence = state.messages.len() as u64 + 1;
        state.messages.push(StoredMessage {
            sequence,
            subject: subject.to_string(),
            msg_id: msg_id.to_string(),
            payload: payload.to_string(),
        });
        drop(streams);

        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn queue_subscribe(
        &self,
        stream: &str,
        subject: &str,
        group: &str,
        options: SubscribeOptions,
    ) -> CollaboratorResult<Box<dyn Subscription>> {
        let mut streams = self.shared.streams.lock().await;
        if options.bind_stream && !streams.contains_key(stream) {
            return Err(CollaboratorError::NotFound(format!("stream {}", stream)));
        }
        let state = streams.entry(stream.to_string()).or_default();
        let last = state.messages.len();
        state
            .consumers
            .entry(options.durable.clone())
            .or_insert_with(|| ConsumerState {
                subject: subject.to_string(),
                cursor: if options.deliver_last {
                    last.saturating_sub(1)
                } else {
                    0
                },
                ..Default::default()
            });
        debug!(stream = %stream, subject = %subject, group = %group, durable = %options.durable, "Queue subscription bound");

        Ok(Box::new(InMemorySubscription {
            shared: self.shared.clone(),
            stream: stream.to_string(),
            durable: options.durable,
            manual_ack: options.manual_ack,
        }))
    }
}

struct InMemorySubscription {
    shared: Arc<Shared>,
    stream: String,
    durable: String,
    manual_ack: bool,
}

impl InMemorySubscription {
    /// Hand out the next redelivery or fresh message, if any.
    async fn try_take(&self) -> Option<Option<Delivery>> {
        let mut streams = self.shared.streams.lock().await;
        let state = streams.get_mut(&self.stream)?;
        if state.closed {
            return Some(None);
        }
        let consumer = state.consumers.get_mut(&self.durable)?;

        let sequence = match consumer.redeliver.pop_front() {
            Some(sequence) => sequence,
            None => loop {
                let message = state.messages.get(consumer.cursor)?;
                consumer.cursor += 1;
                if message.subject == consumer.subject {
                    break message.sequence;
                }
            },
        };

        let message = state.messages.get(sequence as usize - 1)?.clone();
        let attempt = consumer.pending.entry(sequence).or_insert(0);
        *attempt += 1;
        let attempt = *attempt;
        if !self.manual_ack {
            consumer.pending.remove(&sequence);
            consumer.acked.insert(sequence);
        }

        Some(Some(Delivery {
            sequence,
            msg_id: message.msg_id,
            subject: message.subject,
            payload: message.payload,
            attempt,
        }))
    }
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> CollaboratorResult<Option<Delivery>> {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(delivery) = self.try_take().await {
                return Ok(delivery);
            }
            notified.await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> CollaboratorResult<()> {
        let mut streams = self.shared.streams.lock().await;
        let consumer = streams
            .get_mut(&self.stream)
            .and_then(|s| s.consumers.get_mut(&self.durable))
            .ok_or_else(|| CollaboratorError::NotFound(format!("consumer {}", self.durable)))?;
        consumer.pending.remove(&delivery.sequence);
        consumer.redeliver.retain(|s| *s != delivery.sequence);
        consumer.acked.insert(delivery.sequence);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn options(durable: &str, deliver_last: bool) -> SubscribeOptions {
        SubscribeOptions {
            durable: durable.to_string(),
            deliver_last,
            manual_ack: true,
            bind_stream: false,
        }
    }

    #[tokio::test]
    async fn test_competing_consumers_share_messages() {
        let stream = InMemoryStream::new();
        let mut a = stream
            .queue_subscribe("S", "install", "g", options("d", false))
            .await
            .unwrap();
        let mut b = stream
            .queue_subscribe("S", "install", "g", options("d", false))
            .await
            .unwrap();

        stream.publish("S", "install", "1", "m1").await.unwrap();
        stream.publish("S", "install", "2", "m2").await.unwrap();

        let first = a.next().await.unwrap().unwrap();
        let second = b.next().await.unwrap().unwrap();
        assert_eq!(first.payload, "1");
        assert_eq!(second.payload, "2");

        a.ack(&first).await.unwrap();
        b.ack(&second).await.unwrap();
        assert!(stream.pending("S", "d").await.is_empty());
        assert_eq!(stream.acked("S", "d").await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_duplicate_msg_id_is_deduplicated() {
        let stream = InMemoryStream::new();
        stream.publish("S", "install", "1", "m1").await.unwrap();
        stream.publish("S", "install", "1", "m1").await.unwrap();
        assert_eq!(stream.published("S", "install").await.len(), 1);
    }

    #[tokio::test]
    async fn test_unacked_message_is_redelivered() {
        let stream = InMemoryStream::new();
        let mut sub = stream
            .queue_subscribe("S", "install", "g", options("d", false))
            .await
            .unwrap();
        stream.publish("S", "install", "1", "m1").await.unwrap();

        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first.attempt, 1);
        stream.expire_pending("S", "d").await;

        let again = sub.next().await.unwrap().unwrap();
        assert_eq!(again.sequence, first.sequence);
        assert_eq!(again.attempt, 2);
    }

    #[tokio::test]
    async fn test_deliver_last_skips_history_for_new_consumer() {
        let stream = InMemoryStream::new();
        stream.publish("S", "install", "old", "m1").await.unwrap();
        stream.publish("S", "install", "last", "m2").await.unwrap();

        let mut sub = stream
            .queue_subscribe("S", "install", "g", options("fresh", true))
            .await
            .unwrap();
        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first.payload, "last");
    }

    #[tokio::test]
    async fn test_durable_cursor_survives_resubscribe() {
        let stream = InMemoryStream::new();
        let mut sub = stream
            .queue_subscribe("S", "install", "g", options("d", false))
            .await
            .unwrap();
        stream.publish("S", "install", "1", "m1").await.unwrap();
        let first = sub.next().await.unwrap().unwrap();
        sub.ack(&first).await.unwrap();
        drop(sub);

        stream.publish("S", "install", "2", "m2").await.unwrap();
        let mut again = stream
            .queue_subscribe("S", "install", "g", options("d", true))
            .await
            .unwrap();
        assert_eq!(again.next().await.unwrap().unwrap().payload, "2");
    }

    #[tokio::test]
    async fn test_next_waits_for_publish() {
        let stream = InMemoryStream::new();
        let mut sub = stream
            .queue_subscribe("S", "install", "g", options("d", false))
            .await
            .unwrap();

        let publisher = stream.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("S", "install", "late", "m1").await.unwrap();
        });

        let delivery = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.payload, "late");
    }

    #[tokio::test]
    async fn test_publish_failure_and_bind_missing_stream() {
        let stream = InMemoryStream::new();
        stream.set_publish_failing(true);
        assert!(matches!(
            stream.publish("S", "install", "1", "m1").await,
            Err(CollaboratorError::Transport(_))
        ));

        let mut bind = options("d", false);
        bind.bind_stream = true;
        assert!(stream.queue_subscribe("missing", "x", "g", bind).await.is_err());
    }

    #[tokio::test]
    async fn test_close_ends_subscription() {
        let stream = InMemoryStream::new();
        let mut sub = stream
            .queue_subscribe("S", "install", "g", options("d", false))
            .await
            .unwrap();
        stream.close("S").await;
        assert!(sub.next().await.unwrap().is_none());
    }
}
