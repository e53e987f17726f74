//! Kafka-compatible broker client built on rdkafka.
//!
//! Delivery semantics are at-least-once: consumers run with
//! `enable.auto.commit = false`, [`EventConsumer::ack`] commits the offset
//! after the caller has committed its own effects, and
//! [`EventConsumer::nack`] seeks back so the message is fetched again.
//! Each worker should own its consumer so partitions are split across the
//! group and offsets are committed in order per partition.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::Offset;
use rdkafka::TopicPartitionList;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;

use crate::{
    Delivery, DeliveryReceipt, EventConsumer, EventLog, EventLogError, EventProducer,
    OutboundMessage, Result,
};

/// Connection and delivery settings for [`KafkaEventLog`].
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap servers.
    pub brokers: String,
    /// Producer acknowledgment mode (`"all"` waits for every in-sync replica).
    pub acks: String,
    /// How long a send may wait for broker confirmation.
    pub send_timeout: Duration,
    /// Where a group without committed offsets starts reading.
    pub auto_offset_reset: String,
    pub session_timeout_ms: u32,
}

impl KafkaConfig {
    /// Default settings for the given bootstrap servers.
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            acks: "all".to_string(),
            send_timeout: Duration::from_secs(5),
            auto_offset_reset: "earliest".to_string(),
            session_timeout_ms: 6000,
        }
    }
}

/// Kafka-backed event log.
#[derive(Clone)]
pub struct KafkaEventLog {
    producer: FutureProducer,
    config: KafkaConfig,
}

impl KafkaEventLog {
    /// Creates the producer. Consumers are created per subscription.
    pub fn new(config: KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("acks", &config.acks)
            .set("enable.idempotence", "true")
            .set(
                "message.timeout.ms",
                config.send_timeout.as_millis().to_string(),
            )
            .create()
            .map_err(|e| EventLogError::Unavailable(format!("failed to create producer: {e}")))?;

        tracing::info!(brokers = %config.brokers, acks = %config.acks, "kafka producer created");

        Ok(Self { producer, config })
    }
}

#[async_trait]
impl EventProducer for KafkaEventLog {
    async fn send(&self, message: OutboundMessage) -> Result<DeliveryReceipt> {
        let mut headers = OwnedHeaders::new();
        for (name, value) in &message.headers {
            headers = headers.insert(Header {
                key: name.as_str(),
                value: Some(value.as_str()),
            });
        }

        let record = FutureRecord::to(&message.topic)
            .key(&message.key)
            .payload(&message.payload)
            .headers(headers);

        match self
            .producer
            .send(record, Timeout::After(self.config.send_timeout))
            .await
        {
            Ok((partition, offset)) => {
                tracing::debug!(topic = %message.topic, partition, offset, "message confirmed");
                Ok(DeliveryReceipt {
                    topic: message.topic,
                    partition,
                    offset,
                })
            }
            Err((e, _)) => Err(EventLogError::SendFailed {
                topic: message.topic,
                reason: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl EventLog for KafkaEventLog {
    type Consumer = KafkaConsumer;

    async fn subscribe(&self, topic: &str, group: &str) -> Result<KafkaConsumer> {
        let subscription_error = |reason: String| EventLogError::SubscriptionFailed {
            topic: topic.to_string(),
            group: group.to_string(),
            reason,
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.config.auto_offset_reset)
            .set(
                "session.timeout.ms",
                self.config.session_timeout_ms.to_string(),
            )
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| subscription_error(format!("failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| subscription_error(e.to_string()))?;

        tracing::info!(topic, group, manual_commit = true, "kafka consumer subscribed");

        Ok(KafkaConsumer { consumer })
    }
}

/// One member of a Kafka consumer group.
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

#[async_trait]
impl EventConsumer for KafkaConsumer {
    async fn next(&self) -> Result<Delivery> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| EventLogError::Transport(e.to_string()))?;

        let headers = message
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .map(|header| {
                        let value = header
                            .value
                            .map(|v| String::from_utf8_lossy(v).into_owned())
                            .unwrap_or_default();
                        (header.key.to_string(), value)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Delivery {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            headers,
            attempt: 1,
        })
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &delivery.topic,
                delivery.partition,
                Offset::Offset(delivery.offset + 1),
            )
            .map_err(|e| EventLogError::AckFailed(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| EventLogError::AckFailed(e.to_string()))
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        self.consumer
            .seek(
                &delivery.topic,
                delivery.partition,
                Offset::Offset(delivery.offset),
                Duration::from_secs(5),
            )
            .map_err(|e| EventLogError::AckFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kafka_event_log_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KafkaEventLog>();
        assert_send_sync::<KafkaConsumer>();
    }

    #[test]
    fn config_defaults() {
        let config = KafkaConfig::new("localhost:9092");
        assert_eq!(config.acks, "all");
        assert_eq!(config.auto_offset_reset, "earliest");
        assert_eq!(config.send_timeout, Duration::from_secs(5));
    }
}
