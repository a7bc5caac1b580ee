use crate::adapters::transport::{Envelope, Transport, TransportError};
use crate::domain::message::Delivery;
use async_trait::async_trait;
use uuid::Uuid;

/// Accepts every message and only logs it. Stands in for a real provider.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn deliver(&self, envelope: &Envelope) -> Result<Delivery, TransportError> {
        tracing::info!(
            message_id = %envelope.message_id,
            recipient = %envelope.recipient_address,
            subject = %envelope.subject,
            "STUB: Delivering message"
        );
        Ok(Delivery { provider_message_id: Uuid::new_v4().to_string(), provider_thread_id: None })
    }
}
