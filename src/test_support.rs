use crate::adapters::transport::{Envelope, Transport, TransportError};
use crate::domain::message::{Delivery, NewMessage, Recipient, Sender};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Transport that replays queued results and succeeds once the queue is empty.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    results: Mutex<VecDeque<Result<Delivery, TransportError>>>,
    envelopes: Mutex<Vec<Envelope>>,
    latency: Option<Duration>,
}

impl ScriptedTransport {
    pub(crate) fn with_results(results: Vec<Result<Delivery, TransportError>>) -> Self {
        Self { results: Mutex::new(results.into()), ..Self::default() }
    }

    pub(crate) fn with_latency(latency: Duration) -> Self {
        Self { latency: Some(latency), ..Self::default() }
    }

    pub(crate) fn calls(&self) -> usize {
        self.envelopes.lock().unwrap().len()
    }

    pub(crate) fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn deliver(&self, envelope: &Envelope) -> Result<Delivery, TransportError> {
        self.envelopes.lock().unwrap().push(envelope.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let next = self.results.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(Delivery {
                provider_message_id: format!("provider-{}", envelope.message_id),
                provider_thread_id: Some("thread-1".into()),
            })
        })
    }
}

pub(crate) fn new_message(sender: Uuid, max_retries: i32) -> NewMessage {
    NewMessage {
        subject: "Proposal follow-up".into(),
        body: "Just checking whether you had a chance to review the proposal.".into(),
        recipient: Recipient {
            address: "buyer@example.com".into(),
            name: "Pat Buyer".into(),
            contact_id: Some(Uuid::new_v4()),
        },
        sender: Sender { user_id: sender, address: "rep@example.com".into(), name: "Sam Rep".into() },
        max_retries,
    }
}
