//! An in-process stand-in for the publish/subscribe gateway, treated as an external collaborator
//! with an interface only: [`PubSub`] is that interface, and [`LocalPubSub`] is the default
//! implementation used when no external broker is wired in.
//!
//! A `DashMap` of channel name to subscription id to sender, with a `Subscription` that
//! unregisters itself on `Drop`. The channel is always `"runs"`, and the payload is a
//! `serde_json::Value` rather than a generated enum, since the only publisher in this crate is
//! the Event Handler's two event names.

use async_trait::async_trait;
use crossbeam::channel;
use dashmap::DashMap;
use std::fmt::Debug;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait PubSub: Debug + Send + Sync {
    /// Best-effort: implementations must not propagate failures to the caller. The Event
    /// Handler's persistence outcome is authoritative regardless of whether this succeeds.
    async fn publish(&self, channel: &str, event: serde_json::Value);
}

type ChannelMap = DashMap<String, DashMap<Uuid, channel::Sender<serde_json::Value>>>;

#[derive(Debug, Clone, Default)]
pub struct LocalPubSub {
    channels: Arc<ChannelMap>,
}

pub struct Subscription {
    id: Uuid,
    channel: String,
    channels: Arc<ChannelMap>,
    pub receiver: channel::Receiver<serde_json::Value>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(senders) = self.channels.get(&self.channel) {
            senders.remove(&self.id);
        }
    }
}

impl LocalPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, channel: &str) -> Subscription {
        let senders = self.channels.entry(channel.to_string()).or_default();
        let (sender, receiver) = channel::unbounded();
        let id = Uuid::now_v7();
        senders.insert(id, sender);

        Subscription {
            id,
            channel: channel.to_string(),
            channels: Arc::clone(&self.channels),
            receiver,
        }
    }
}

#[async_trait]
impl PubSub for LocalPubSub {
    async fn publish(&self, channel: &str, event: serde_json::Value) {
        let Some(senders) = self.channels.get(channel) else {
            return;
        };

        for entry in senders.iter() {
            // Best-effort: a disconnected receiver is not an error for the publisher.
            let _ = entry.value().send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = LocalPubSub::new();
        let sub = bus.subscribe("runs");

        bus.publish("runs", json!({"kind": "run.created"})).await;

        let received = sub.receiver.recv().unwrap();
        assert_eq!(received, json!({"kind": "run.created"}));
    }

    #[tokio::test]
    async fn dropped_subscription_stops_receiving() {
        let bus = LocalPubSub::new();
        let sub = bus.subscribe("runs");
        drop(sub);

        // No subscribers left; publish must not panic or block.
        bus.publish("runs", json!({"kind": "run.created"})).await;
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_a_no_op() {
        let bus = LocalPubSub::new();
        bus.publish("runs", json!({"kind": "run.created"})).await;
    }
}
