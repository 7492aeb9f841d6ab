use crate::amqp::configuration::ConnectionConfig;
use anyhow::Context;
use lapin::{uri::AMQPUri, ConnectionProperties};
use tokio::time::timeout;
use tracing::warn;

/// Used when [`ConnectionConfig::connection_timeout_seconds`] is left unspecified.
const DEFAULT_CONNECTION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Clone)]
/// All the information required to open a connection to a RabbitMq broker.
pub struct ConnectionFactory {
    uri: AMQPUri,
    /// The timeout observed when trying to connect to RabbitMq.
    connection_timeout: std::time::Duration,
}

impl ConnectionFactory {
    /// Create a new connection factory from a [`ConnectionConfig`].
    ///
    /// If the connection timeout is left unspecified, it will be defaulted to 10 seconds.
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            uri: config.amqp_uri(),
            connection_timeout: config
                .connection_timeout()
                .unwrap_or(DEFAULT_CONNECTION_TIMEOUT),
        }
    }

    /// Open a new connection to a RabbitMq broker.
    ///
    /// Every connection gets a callback logging protocol errors; the pool replaces it
    /// with a close-notification when a consumer watches the connection.
    #[tracing::instrument(
        name = "rabbitmq_connect",
        skip(self),
        fields(host = %self.uri.authority.host, vhost = %self.uri.vhost)
    )]
    pub async fn new_connection(&self) -> Result<lapin::Connection, anyhow::Error> {
        let properties =
            ConnectionProperties::default().with_executor(tokio_executor_trait::Tokio::current());
        let connection = timeout(
            self.connection_timeout,
            lapin::Connection::connect_uri(self.uri.clone(), properties),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Timed out while trying to connect to RabbitMQ."))?
        .context("Failed to connect to RabbitMQ.")?;
        connection.on_error(|e| {
            warn!("RabbitMQ broken connection: {:?}", e);
        });
        Ok(connection)
    }
}
