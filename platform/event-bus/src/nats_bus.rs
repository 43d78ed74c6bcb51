//! NATS-based implementation of the EventBus trait

use crate::{validate_publish_subject, BusError, BusMessage, BusResult, EventBus};
use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;

/// EventBus implementation backed by a NATS connection
///
/// # Example
/// ```rust,no_run
/// use event_bus::{EventBus, NatsBus};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = NatsBus::connect("nats://localhost:4222").await?;
/// bus.publish("payouts.events.payout.paid", b"{}".to_vec()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
}

impl NatsBus {
    /// Wrap an already-connected client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect to a NATS server
    pub async fn connect(url: &str) -> BusResult<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;
        tracing::info!(url = %url, "Connected to NATS");
        Ok(Self::new(client))
    }

    /// Underlying client, for features the EventBus trait does not expose
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        self.publish_message(BusMessage::new(subject, payload)).await
    }

    async fn publish_message(&self, msg: BusMessage) -> BusResult<()> {
        validate_publish_subject(&msg.subject)?;

        let result = match &msg.headers {
            Some(headers) if !headers.is_empty() => {
                let mut nats_headers = HeaderMap::new();
                for (key, value) in headers {
                    nats_headers.insert(key.as_str(), value.as_str());
                }
                self.client
                    .publish_with_headers(msg.subject.clone(), nats_headers, msg.payload.into())
                    .await
            }
            _ => {
                self.client
                    .publish(msg.subject.clone(), msg.payload.into())
                    .await
            }
        };
        result.map_err(|e| BusError::PublishError(e.to_string()))?;

        // Surface broker-side failures before the outbox marks the record sent
        self.client
            .flush()
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?;

        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let stream = subscriber.map(|nats_msg| {
            let mut msg = BusMessage::new(nats_msg.subject.to_string(), nats_msg.payload.to_vec());

            if let Some(reply) = nats_msg.reply {
                msg = msg.with_reply_to(reply.to_string());
            }

            if let Some(nats_headers) = nats_msg.headers {
                let mut headers = HashMap::new();
                for (key, values) in nats_headers.iter() {
                    if let Some(value) = values.first() {
                        headers.insert(key.to_string(), value.to_string());
                    }
                }
                if !headers.is_empty() {
                    msg = msg.with_headers(headers);
                }
            }

            msg
        });

        Ok(stream.boxed())
    }
}
