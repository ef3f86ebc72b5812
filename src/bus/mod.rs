use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};

use crate::core::AppError;

pub const TICKS_QUEUE: &str = "ticks";
pub const TICKS_DLQ: &str = "ticks.dlq";

/// Thin wrapper over a `lapin` channel. Queues are declared durable so
/// messages survive a broker restart; delivery mode 2 (persistent) is set on
/// every publish.
pub struct Bus {
    _conn: Connection,
    channel: Channel,
}

impl Bus {
    pub async fn connect(amqp_url: &str) -> Result<Self, AppError> {
        let conn = Connection::connect(amqp_url, ConnectionProperties::default()).await?;
        let channel = conn.create_channel().await?;
        Ok(Self {
            _conn: conn,
            channel,
        })
    }

    pub async fn declare_durable_queue(&self, name: &str) -> Result<(), AppError> {
        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    pub async fn publish_persistent(&self, queue: &str, payload: &[u8]) -> Result<(), AppError> {
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await?
            .await?;
        Ok(())
    }

    pub async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<Consumer, AppError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(consumer)
    }

    pub async fn ack(&self, delivery_tag: u64) -> Result<(), AppError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    /// Nack with requeue, used for transient persistence failures so no
    /// message is lost (§4.4: "the queue is durable, so no message is
    /// lost").
    pub async fn nack_requeue(&self, delivery_tag: u64) -> Result<(), AppError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Nack without requeue, used once a message has been dead-lettered
    /// explicitly (published to `ticks.dlq`) so it is not redelivered here.
    pub async fn nack_drop(&self, delivery_tag: u64) -> Result<(), AppError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue: false,
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }
}
