// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0

// Message Bus - Topic-based Pub/Sub between convoy agents
//
// Every agent broadcasts JSON envelopes through a Transport and consumes the
// envelopes of every agent (its own included) from an Inbox fed by a local
// InMemoryBroker. Delivery is at-least-once at best: no ordering across
// senders, no persistence, no retries. Periodic re-broadcast by the protocol
// is the only recovery mechanism.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::message::{DecodeError, Envelope, Topic};
use crate::domain::signature::{Clock, Signature};

/// Raw encoded envelope as it travels between agents.
pub type Payload = Arc<[u8]>;

/// Errors raised while sending or receiving envelopes
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Message bus is closed")]
    Closed,

    #[error("Inbox lagged by {0} messages (messages were dropped)")]
    Lagged(u64),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Transport failure: {0}")]
    Transport(String),
}

impl BusError {
    /// Only a closed bus ends a subscriber loop. Everything else concerns a
    /// single message.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BusError::Closed)
    }
}

/// Outbound side of the bus.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fire-and-forget broadcast to every agent, the sender included.
    async fn broadcast(&self, payload: Payload) -> Result<(), BusError>;
}

/// Process-local broadcast medium.
///
/// In a simulation all agents share one broker. A networked node owns one
/// broker that its HTTP gateway feeds.
#[derive(Clone)]
pub struct InMemoryBroker {
    sender: Arc<broadcast::Sender<Payload>>,
}

impl InMemoryBroker {
    /// Capacity determines how many messages can be buffered before a slow
    /// inbox starts dropping the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Broker with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Hands `payload` to every current inbox.
    pub fn deliver(&self, payload: Payload) -> usize {
        let receivers = self.sender.send(payload).unwrap_or(0);
        if receivers == 0 {
            debug!("No inbox listening to the broker");
        }
        receivers
    }

    pub fn subscribe(&self) -> Inbox {
        Inbox {
            receiver: self.sender.subscribe(),
        }
    }

    /// Transport delivering straight into this broker.
    pub fn transport(&self) -> BrokerTransport {
        BrokerTransport {
            broker: self.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct BrokerTransport {
    broker: InMemoryBroker,
}

#[async_trait]
impl Transport for BrokerTransport {
    async fn broadcast(&self, payload: Payload) -> Result<(), BusError> {
        self.broker.deliver(payload);
        Ok(())
    }
}

/// Inbound side of the bus: every envelope delivered to the local broker.
pub struct Inbox {
    receiver: broadcast::Receiver<Payload>,
}

impl Inbox {
    /// Receive and decode the next envelope.
    ///
    /// A [`BusError::Decode`] or [`BusError::Lagged`] only concerns the
    /// message at hand; keep receiving afterwards.
    pub async fn recv(&mut self) -> Result<Envelope, BusError> {
        let payload = self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => BusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Inbox lagged by {} messages", n);
                BusError::Lagged(n)
            }
        })?;

        Envelope::decode(&payload).map_err(|e| {
            metrics::counter!("parknet_decode_errors_total").increment(1);
            warn!(error = %e, "Dropping undecodable message");
            BusError::Decode(e)
        })
    }
}

/// Per-agent publishing handle.
///
/// Stamps every envelope with the agent's signature and the current time.
#[derive(Clone)]
pub struct MessageBus {
    signature: Signature,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn Transport>,
}

impl MessageBus {
    pub fn new(signature: Signature, clock: Arc<dyn Clock>, transport: Arc<dyn Transport>) -> Self {
        Self {
            signature,
            clock,
            transport,
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Publishes `content` on `topic`.
    ///
    /// Failures are logged and counted here; callers may ignore the result.
    pub async fn publish<T: Serialize + ?Sized>(&self, topic: Topic, content: &T) -> Result<(), BusError> {
        let content = serde_json::to_value(content).map_err(BusError::Encode)?;
        let envelope = Envelope::new(self.signature.clone(), topic, content, self.clock.now());
        self.send(&envelope).await
    }

    pub async fn send(&self, envelope: &Envelope) -> Result<(), BusError> {
        let payload: Payload = envelope.encode().map_err(BusError::Encode)?.into();
        debug!(topic = %envelope.topic, sender = %envelope.sender, "Broadcasting message");

        self.transport.broadcast(payload).await.map_err(|e| {
            metrics::counter!("parknet_transport_errors_total", "topic" => envelope.topic.clone()).increment(1);
            warn!(topic = %envelope.topic, error = %e, "Broadcast failed");
            e
        })
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Topics an agent handles, and whether it wants its own messages back.
#[derive(Debug, Clone, Default)]
pub struct Subscriptions {
    topics: HashMap<Topic, bool>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, topic: Topic, receive_own: bool) -> &mut Self {
        self.topics.insert(topic, receive_own);
        self
    }

    pub fn is_subscribed(&self, topic: Topic) -> bool {
        self.topics.contains_key(&topic)
    }

    /// The topic `envelope` should be dispatched to, if any.
    ///
    /// Unrecognized or unsubscribed topics are ignored, and so are the
    /// local agent's own messages unless subscribed with `receive_own`.
    pub fn route(&self, envelope: &Envelope, local: &Signature) -> Option<Topic> {
        let topic = envelope.topic()?;
        let receive_own = *self.topics.get(&topic)?;
        if envelope.is_from(local) && !receive_own {
            return None;
        }
        Some(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signature::{ManualClock, Timestamp};
    use serde_json::json;

    fn bus(broker: &InMemoryBroker, signature: &str, clock: &ManualClock) -> MessageBus {
        MessageBus::new(
            Signature::from(signature),
            Arc::new(clock.clone()),
            Arc::new(broker.transport()),
        )
    }

    #[tokio::test]
    async fn test_publish_reaches_every_inbox() {
        let broker = InMemoryBroker::new(16);
        let clock = ManualClock::new(Timestamp::from_secs(42.0));
        let mut inbox_a = broker.subscribe();
        let mut inbox_b = broker.subscribe();
        assert_eq!(broker.subscriber_count(), 2);

        bus(&broker, "a", &clock)
            .publish(Topic::ProcessFinished, &Signature::from("a"))
            .await
            .unwrap();

        for inbox in [&mut inbox_a, &mut inbox_b] {
            let envelope = inbox.recv().await.unwrap();
            assert_eq!(envelope.sender, Signature::from("a"));
            assert_eq!(envelope.topic(), Some(Topic::ProcessFinished));
            assert_eq!(envelope.content, json!("a"));
            assert_eq!(envelope.timestamp, Timestamp::from_secs(42.0));
        }
    }

    #[tokio::test]
    async fn test_garbage_does_not_stop_inbox() {
        let broker = InMemoryBroker::new(16);
        let clock = ManualClock::new(Timestamp::from_secs(1.0));
        let mut inbox = broker.subscribe();

        broker.deliver(Arc::from(&b"{not json"[..]));
        bus(&broker, "a", &clock)
            .publish(Topic::CompletedGlobal, &serde_json::Value::Null)
            .await
            .unwrap();

        let err = inbox.recv().await.unwrap_err();
        assert!(matches!(err, BusError::Decode(_)));
        assert!(!err.is_fatal());

        let envelope = inbox.recv().await.unwrap();
        assert_eq!(envelope.topic(), Some(Topic::CompletedGlobal));
    }

    #[tokio::test]
    async fn test_closed_broker_is_fatal() {
        let broker = InMemoryBroker::new(4);
        let mut inbox = broker.subscribe();
        drop(broker);

        let err = inbox.recv().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_subscriptions_filter_own_and_unknown_topics() {
        let mut subscriptions = Subscriptions::new();
        subscriptions
            .subscribe(Topic::Formation, true)
            .subscribe(Topic::ActiveGlobal, false);

        let me = Signature::from("me");
        let envelope = |sender: &str, topic: &str| Envelope {
            sender: Signature::from(sender),
            topic: topic.to_string(),
            content: serde_json::Value::Null,
            timestamp: Timestamp::from_secs(0.0),
        };

        assert_eq!(subscriptions.route(&envelope("me", "formation"), &me), Some(Topic::Formation));
        assert_eq!(subscriptions.route(&envelope("me", "action/active-global"), &me), None);
        assert_eq!(
            subscriptions.route(&envelope("peer", "action/active-global"), &me),
            Some(Topic::ActiveGlobal)
        );
        assert_eq!(subscriptions.route(&envelope("peer", "process-finished"), &me), None);
        assert_eq!(subscriptions.route(&envelope("peer", "parking/lot"), &me), None);
    }
}
