//! Publishing mutation results to subscribers.

use std::collections::BTreeSet;

use futures::stream::{BoxStream, StreamExt};
use log::{debug, warn};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Topic-based publish/subscribe. Topics are mutation field names.
pub trait PubSub: Send + Sync {
    /// Publishes `payload` to everyone subscribed to `topic`. Never blocks.
    fn publish(&self, topic: &str, payload: JsonValue);

    /// A stream of every payload subsequently published to any of `topics`.
    fn subscribe(&self, topics: &[String]) -> BoxStream<'static, JsonValue>;
}

/// In-process pub-sub backed by a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastPubSub {
    tx: broadcast::Sender<(String, JsonValue)>,
}

impl BroadcastPubSub {
    /// A pub-sub where slow subscribers lose events once `capacity`
    /// undelivered events pile up.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl Default for BroadcastPubSub {
    fn default() -> Self {
        Self::new(100)
    }
}

impl PubSub for BroadcastPubSub {
    fn publish(&self, topic: &str, payload: JsonValue) {
        // No subscribers is not an error.
        let delivered = self.tx.send((topic.to_string(), payload)).unwrap_or(0);
        debug!("Published to {} ({} subscriber(s))", topic, delivered);
    }

    fn subscribe(&self, topics: &[String]) -> BoxStream<'static, JsonValue> {
        let topics = topics.iter().cloned().collect::<BTreeSet<String>>();
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(move |event| {
                let item = match event {
                    Ok((topic, payload)) if topics.contains(&topic) => Some(payload),
                    Ok(_) => None,
                    Err(e) => {
                        warn!("Subscriber fell behind: {}", e);
                        None
                    }
                };
                futures::future::ready(item)
            })
            .boxed()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_only_see_their_topics() {
        let pubsub = BroadcastPubSub::default();
        let mut stream = pubsub.subscribe(&["createPost".to_string(), "updatePost".to_string()]);
        pubsub.publish("deletePost", json!({"id": 0}));
        pubsub.publish("createPost", json!({"id": 1}));
        pubsub.publish("updatePost", json!({"id": 2}));
        assert_eq!(stream.next().await, Some(json!({"id": 1})));
        assert_eq!(stream.next().await, Some(json!({"id": 2})));
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let pubsub = BroadcastPubSub::new(4);
        pubsub.publish("createPost", json!({}));
    }
}
