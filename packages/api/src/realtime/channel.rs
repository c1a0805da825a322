use super::presence::{PresenceError, PresenceStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Buffered messages per subscriber. A client that falls further behind than
/// this drops the oldest messages instead of stalling the channel.
const CHANNEL_CAPACITY: usize = 256;

/// Envelope for every message on the donations topic. Each variant carries an
/// explicit `type` tag so clients never have to sniff payload shapes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
    VisitorCount {
        count: i64,
    },
    Donation {
        amount: i64,
        donor_name: String,
        message: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

/// Single-topic fan-out channel with a shared presence counter.
///
/// Delivery is best-effort and at-most-once per subscriber: a client that
/// disconnects mid-broadcast simply misses the message, and one dead client
/// never blocks delivery to the rest.
#[derive(Debug)]
pub struct DonationsChannel {
    sender: broadcast::Sender<ChannelMessage>,
    presence: Arc<dyn PresenceStore>,
}

impl DonationsChannel {
    pub fn new(presence: Arc<dyn PresenceStore>) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender, presence }
    }

    /// Register a listener. The receiver is created before the count is
    /// announced so the joining client sees its own visitor-count update.
    pub async fn subscribe(&self) -> Result<broadcast::Receiver<ChannelMessage>, PresenceError> {
        let receiver = self.sender.subscribe();
        let count = self.presence.incr().await?;
        self.publish(ChannelMessage::VisitorCount { count });
        Ok(receiver)
    }

    /// Deregister a listener. Callers invoke this on every disconnect path:
    /// client close, socket error, or task teardown.
    pub async fn unsubscribe(&self) -> Result<(), PresenceError> {
        let count = self.presence.decr().await?;
        self.publish(ChannelMessage::VisitorCount { count });
        Ok(())
    }

    /// Push a message to every current subscriber.
    pub fn publish(&self, message: ChannelMessage) {
        // send only errors when nobody is listening, which is fine for a live feed
        let _ = self.sender.send(message);
    }

    pub fn presence_backend(&self) -> &'static str {
        self.presence.backend_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::presence::InMemoryPresence;

    fn channel() -> DonationsChannel {
        DonationsChannel::new(Arc::new(InMemoryPresence::new()))
    }

    fn donation(amount: i64) -> ChannelMessage {
        ChannelMessage::Donation {
            amount,
            donor_name: "Anonymous".to_string(),
            message: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscribers_see_counts_rise_and_fall() {
        let channel = channel();

        let mut rx1 = channel.subscribe().await.unwrap();
        assert_eq!(
            rx1.recv().await.unwrap(),
            ChannelMessage::VisitorCount { count: 1 }
        );

        let mut rx2 = channel.subscribe().await.unwrap();
        assert_eq!(
            rx1.recv().await.unwrap(),
            ChannelMessage::VisitorCount { count: 2 }
        );
        // the joining client receives its own count update too
        assert_eq!(
            rx2.recv().await.unwrap(),
            ChannelMessage::VisitorCount { count: 2 }
        );

        drop(rx2);
        channel.unsubscribe().await.unwrap();
        assert_eq!(
            rx1.recv().await.unwrap(),
            ChannelMessage::VisitorCount { count: 1 }
        );
    }

    #[tokio::test]
    async fn publishes_reach_every_subscriber() {
        let channel = channel();

        let mut rx1 = channel.subscribe().await.unwrap();
        let mut rx2 = channel.subscribe().await.unwrap();
        // drain the join announcements
        rx1.recv().await.unwrap();
        rx1.recv().await.unwrap();
        rx2.recv().await.unwrap();

        channel.publish(donation(500));

        assert_eq!(rx1.recv().await.unwrap(), rx2.recv().await.unwrap());
        assert!(matches!(
            rx1.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn dead_subscriber_does_not_block_the_rest() {
        let channel = channel();

        let mut alive = channel.subscribe().await.unwrap();
        let dead = channel.subscribe().await.unwrap();
        alive.recv().await.unwrap();
        alive.recv().await.unwrap();
        drop(dead);

        channel.publish(donation(1200));

        match alive.recv().await.unwrap() {
            ChannelMessage::Donation { amount, .. } => assert_eq!(amount, 1200),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn messages_arrive_in_publish_order() {
        let channel = channel();
        let mut rx = channel.subscribe().await.unwrap();
        rx.recv().await.unwrap();

        for amount in [100, 200, 300] {
            channel.publish(donation(amount));
        }
        for expected in [100, 200, 300] {
            match rx.recv().await.unwrap() {
                ChannelMessage::Donation { amount, .. } => assert_eq!(amount, expected),
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }

    #[test]
    fn every_message_carries_a_type_tag() {
        let count = serde_json::to_value(ChannelMessage::VisitorCount { count: 3 }).unwrap();
        assert_eq!(count["type"], "visitor_count");
        assert_eq!(count["count"], 3);

        let donation = serde_json::to_value(donation(500)).unwrap();
        assert_eq!(donation["type"], "donation");
        assert_eq!(donation["amount"], 500);
    }
}
