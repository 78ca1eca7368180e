//! Kafka-backed event source.
//!
//! Offsets are committed manually, one message at a time, and only for
//! messages whose reward has been stored. The committed offset is the one
//! after the message, as Kafka expects.

use crate::config::file::KafkaConfig;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use relayer_core::events::{SourceMessage, SourcePosition, SourceSink};
use relayer_core::source::{EventSource, SourceError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct KafkaEventSource {
    consumer: StreamConsumer,
    topics: Vec<String>,
    group_id: String,
}

impl KafkaEventSource {
    pub fn new(config: &KafkaConfig) -> Result<Self, KafkaError> {
        let group_id = config.group_id();
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", "latest")
            .set("enable.auto.commit", "false")
            .create()?;

        Ok(Self {
            consumer,
            topics: config.topics.clone(),
            group_id,
        })
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    async fn consume(
        &self,
        sink: SourceSink,
        cancel: CancellationToken,
    ) -> Result<(), SourceError> {
        let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        self.consumer
            .subscribe(&topics)
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        info!(topics = ?self.topics, group_id = %self.group_id, "Subscribed to Kafka topics");

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.consumer.recv() => match received {
                    Ok(message) => to_source_message(&message),
                    Err(e) => {
                        warn!(error = %e, "Kafka consumer error");
                        continue;
                    }
                },
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                sent = sink.send(message) => {
                    if sent.is_err() {
                        info!("Message sink closed");
                        break;
                    }
                }
            }
        }

        self.consumer.unsubscribe();
        info!("Kafka consumer stopped");
        Ok(())
    }

    async fn acknowledge(&self, position: &SourcePosition) -> Result<(), SourceError> {
        let failed = |e: KafkaError| SourceError::Acknowledge {
            position: position.clone(),
            reason: e.to_string(),
        };
        let offsets = commit_offsets(position).map_err(failed)?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(failed)
    }
}

fn to_source_message<M: Message>(message: &M) -> SourceMessage {
    SourceMessage {
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        position: SourcePosition {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
        },
    }
}

/// Offsets to commit once `position` has been handled.
fn commit_offsets(position: &SourcePosition) -> KafkaResult<TopicPartitionList> {
    let mut offsets = TopicPartitionList::new();
    offsets.add_partition_offset(
        &position.topic,
        position.partition,
        Offset::Offset(position.offset + 1),
    )?;
    Ok(offsets)
}
