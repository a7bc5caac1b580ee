use crate::adapters::transport::{Envelope, Transport, TransportError};
use crate::domain::message::Delivery;
use async_trait::async_trait;
use std::time::Duration;

/// Bounds every call to the wrapped transport. A timeout is reported as retryable since the
/// provider may or may not have accepted the message.
#[derive(Debug)]
pub struct TimeoutTransport<T> {
    inner: T,
    timeout: Duration,
}

impl<T: Transport> TimeoutTransport<T> {
    #[must_use]
    pub const fn new(inner: T, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<T: Transport> Transport for TimeoutTransport<T> {
    async fn deliver(&self, envelope: &Envelope) -> Result<Delivery, TransportError> {
        match tokio::time::timeout(self.timeout, self.inner.deliver(envelope)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(message_id = %envelope.message_id, timeout = ?self.timeout, "Transport call timed out");
                Err(TransportError::retryable(format!("transport call timed out after {:?}", self.timeout))
                    .with_code("timeout"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::transport::{FailureKind, LogTransport};
    use uuid::Uuid;

    #[derive(Debug)]
    struct HangingTransport;

    #[async_trait]
    impl Transport for HangingTransport {
        async fn deliver(&self, _envelope: &Envelope) -> Result<Delivery, TransportError> {
            std::future::pending().await
        }
    }

    fn envelope() -> Envelope {
        Envelope {
            message_id: Uuid::new_v4(),
            recipient_address: "lead@example.com".into(),
            recipient_name: "Lead".into(),
            sender_address: "rep@example.com".into(),
            sender_name: "Rep".into(),
            subject: "Hello".into(),
            body: "Body".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_call_becomes_retryable_error() {
        let transport = TimeoutTransport::new(HangingTransport, Duration::from_secs(30));

        let err = transport.deliver(&envelope()).await.unwrap_err();

        assert_eq!(err.kind, FailureKind::Retryable);
        assert_eq!(err.code.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let transport = TimeoutTransport::new(LogTransport, Duration::from_secs(1));

        let delivery = transport.deliver(&envelope()).await.unwrap();

        assert!(!delivery.provider_message_id.is_empty());
    }
}
