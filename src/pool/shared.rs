//! [`ConnectionPool`] backed by real RabbitMq connections.
use crate::amqp::{configuration::ConnectionConfig, ConnectionFactory, Delivery};
use crate::pool::connection::PooledConnection;
use crate::pool::transport::{AcquiredConnection, ChannelRequest, ConnectionPool, ConsumerChannel};
use crate::pool::Error;
use amq_protocol_types::{AMQPValue, FieldTable};
use futures_util::{stream::BoxStream, StreamExt, TryStreamExt};
use lapin::{
    options::{BasicConsumeOptions, BasicQosOptions},
    Channel,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// AMQP reply code for a normal shutdown.
const REPLY_SUCCESS: u16 = 200;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    address: String,
    tag: String,
}

/// Hands out shared RabbitMq connections, keyed by broker address and consumer tag.
///
/// A healthy cached connection is reused; a missing or broken one is replaced by a freshly
/// opened connection. Each consumer always gets its own channel.
///
/// `SharedConnectionPool` is cheap to clone: clones share the same cache.
#[derive(Clone, Default)]
pub struct SharedConnectionPool {
    connections: Arc<Mutex<HashMap<PoolKey, PooledConnection>>>,
}

impl SharedConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of connections currently cached, healthy or not.
    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl ConnectionPool for SharedConnectionPool {
    type Connection = PooledConnection;
    type Channel = Channel;
    type Delivery = Delivery;
    type Deliveries = BoxStream<'static, Result<Delivery, Error>>;

    async fn acquire(
        &self,
        config: &ConnectionConfig,
        tag: &str,
    ) -> Result<AcquiredConnection<PooledConnection>, Error> {
        let key = PoolKey {
            address: config.address.clone(),
            tag: tag.to_owned(),
        };
        // The lock is held while connecting: concurrent consumers asking for the same
        // key wait for a single connection instead of racing to open several.
        let mut connections = self.connections.lock().await;
        if let Some(connection) = connections.get(&key) {
            if connection.is_healthy() {
                return Ok(AcquiredConnection {
                    connection: connection.clone(),
                    is_new: false,
                });
            }
            tracing::debug!(
                address = %key.address,
                tag = %key.tag,
                "Replacing a broken cached connection"
            );
        }
        let connection =
            PooledConnection::new(ConnectionFactory::new(config).new_connection().await?);
        connections.insert(key, connection.clone());
        Ok(AcquiredConnection {
            connection,
            is_new: true,
        })
    }

    #[tracing::instrument(name = "rabbitmq_create_consumer_channel", skip(self, connection))]
    async fn create_consumer_channel(
        &self,
        connection: &PooledConnection,
        request: ChannelRequest<'_>,
    ) -> Result<ConsumerChannel<Channel, Self::Deliveries>, Error> {
        let channel = connection.create_channel().await?;
        channel
            .basic_qos(request.prefetch_count, BasicQosOptions { global: false })
            .await?;
        let mut args = FieldTable::default();
        if let Some(priority) = request.priority {
            args.insert("x-priority".into(), AMQPValue::LongInt(priority));
        }
        let consumer = channel
            .basic_consume(
                request.queue,
                request.tag,
                BasicConsumeOptions::default(),
                args,
            )
            .await?;
        Ok(ConsumerChannel {
            channel,
            deliveries: consumer.map_ok(Delivery::from).map_err(Error::from).boxed(),
        })
    }

    async fn close_connection(&self, connection: &PooledConnection) {
        self.connections
            .lock()
            .await
            .retain(|_, cached| !cached.same_as(connection));
        if connection.is_healthy() {
            if let Err(e) = connection.close(REPLY_SUCCESS, "closed by consumer").await {
                tracing::debug!(error = %e, "Failed to close RabbitMQ connection");
            }
        }
    }

    async fn close_channel(&self, channel: &Channel) {
        if let Err(e) = channel.close(REPLY_SUCCESS, "closed by consumer").await {
            tracing::debug!(error = %e, "Failed to close RabbitMQ channel");
        }
    }
}
