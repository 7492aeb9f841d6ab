//! Implements [`BrokerChannel`] for [`Channel`].
use crate::amqp::convenience::BasicPropertiesExt;
use crate::pool::transport::{BrokerChannel, CloseSignals};
use crate::pool::Error;
use lapin::{
    options::{BasicGetOptions, BasicRejectOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel, ChannelState,
};
use std::time::SystemTime;
use tokio::sync::mpsc;

#[async_trait::async_trait]
impl BrokerChannel for Channel {
    fn notify_close(&self, capacity: usize) -> CloseSignals {
        let (sender, receiver) = mpsc::channel(capacity);
        self.on_error(move |e| {
            let _ = sender.try_send(e.into());
        });
        receiver
    }

    fn is_open(&self) -> bool {
        matches!(self.status().state(), ChannelState::Connected)
    }

    async fn queue_depth(&self, queue: &str) -> Result<u32, Error> {
        let options = QueueDeclareOptions {
            passive: true,
            ..QueueDeclareOptions::default()
        };
        let queue = self
            .queue_declare(queue, options, FieldTable::default())
            .await?;
        Ok(queue.message_count())
    }

    async fn peek_timestamp(&self, queue: &str) -> Result<Option<SystemTime>, Error> {
        let Some(message) = self
            .basic_get(queue, BasicGetOptions { no_ack: false })
            .await?
        else {
            return Ok(None);
        };
        let sent_at = message.delivery.properties.sent_at();
        message
            .delivery
            .acker
            .reject(BasicRejectOptions { requeue: true })
            .await?;
        Ok(sent_at)
    }
}
