use amq_protocol_types::{DeliveryTag, ShortString};
use lapin::{
    acker::Acker,
    options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions},
    BasicProperties,
};

/// A message received from a RabbitMq consumer channel.
#[derive(Debug, PartialEq)]
pub struct Delivery {
    /// The delivery tag of the message.
    pub delivery_tag: DeliveryTag,

    /// The exchange of the message. May be an empty string
    /// if the default exchange is used.
    pub exchange: ShortString,

    /// The routing key of the message. May be an empty string
    /// if no routing key is specified.
    pub routing_key: ShortString,

    /// Whether this message was redelivered
    pub redelivered: bool,

    /// Contains the properties and the headers of the
    /// message.
    pub properties: BasicProperties,

    /// The payload of the message in binary format.
    pub data: Vec<u8>,

    // Not exposed: settling goes through `ack`, `nack` and `reject`.
    acker: Acker,
}

impl Delivery {
    /// Acknowledge the message with the broker.
    pub async fn ack(&self) -> Result<(), lapin::Error> {
        self.acker.ack(BasicAckOptions::default()).await
    }

    /// Negatively acknowledge the message, asking the broker to requeue it if `requeue` is set.
    pub async fn nack(&self, requeue: bool) -> Result<(), lapin::Error> {
        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
    }

    /// Reject the message, asking the broker to requeue it if `requeue` is set.
    pub async fn reject(&self, requeue: bool) -> Result<(), lapin::Error> {
        self.acker.reject(BasicRejectOptions { requeue }).await
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(value: lapin::message::Delivery) -> Self {
        Self {
            delivery_tag: value.delivery_tag,
            exchange: value.exchange,
            routing_key: value.routing_key,
            redelivered: value.redelivered,
            properties: value.properties,
            data: value.data,
            acker: value.acker,
        }
    }
}
