use super::{PublishError, Publisher, PublisherTransport};
use async_trait::async_trait;

/// Accepts every publisher without sending anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPublisher;

#[async_trait]
impl PublisherTransport for NullPublisher {
    fn protocol(&self) -> &str {
        "null"
    }

    async fn send(&self, publisher: &Publisher) -> Result<String, PublishError> {
        tracing::trace!(
            target: "eel::publisher",
            event = "null_publish",
            url = %publisher.url(),
            handler = %publisher.handler
        );
        Ok(String::new())
    }
}
