use crate::amqp::configuration::ConnectionConfig;
use crate::pool::Error;
use futures_util::Stream;
use std::time::SystemTime;
use tokio::sync::mpsc;

/// Receiving end of a close-notification.
///
/// A received item is the protocol error that closed the resource. The stream ending
/// (`recv` returning `None`) means the resource is gone without an error being reported:
/// it is closed all the same.
pub type CloseSignals = mpsc::Receiver<Error>;

/// A broker connection handed out by a [`ConnectionPool`].
pub trait BrokerConnection: Clone + Send + Sync + 'static {
    /// Subscribe to the close-notifications of this connection.
    ///
    /// `capacity` sizes the buffer between the notifier and the subscriber: the notifier
    /// never blocks, a notification that does not fit is dropped.
    fn notify_close(&self, capacity: usize) -> CloseSignals;
}

/// A consumer channel opened by a [`ConnectionPool`].
///
/// Besides close-notifications, it exposes the read-only queue inspection used to sample
/// queue metrics.
#[async_trait::async_trait]
pub trait BrokerChannel: Clone + Send + Sync + 'static {
    /// Subscribe to the close-notifications of this channel.
    ///
    /// See [`BrokerConnection::notify_close`].
    fn notify_close(&self, capacity: usize) -> CloseSignals;

    /// `false` once the channel has been closed, by either side.
    fn is_open(&self) -> bool;

    /// The number of messages ready in `queue`, without modifying the queue
    /// (a passive declare).
    async fn queue_depth(&self, queue: &str) -> Result<u32, Error>;

    /// Fetch the oldest visible message in `queue` without acknowledging it, put it back
    /// and return the timestamp it was stamped with by its publisher.
    ///
    /// `None` if the queue was empty or the message carried no timestamp.
    async fn peek_timestamp(&self, queue: &str) -> Result<Option<SystemTime>, Error>;
}

/// A connection returned by [`ConnectionPool::acquire`].
pub struct AcquiredConnection<C> {
    pub connection: C,
    /// `true` if the connection was opened for this acquisition rather than reused.
    ///
    /// Only the consumer that caused a connection to be opened watches it for close-signals:
    /// the lifecycle of a shared connection is someone else's to watch.
    pub is_new: bool,
}

/// What a consumer channel should be bound to.
#[derive(Debug, Clone, Copy)]
pub struct ChannelRequest<'a> {
    pub tag: &'a str,
    pub queue: &'a str,
    /// Consumer priority. See https://www.rabbitmq.com/consumer-priority.html.
    pub priority: Option<i32>,
    pub prefetch_count: u16,
}

/// A channel consuming from a queue, together with its stream of deliveries.
pub struct ConsumerChannel<Ch, D> {
    pub channel: Ch,
    pub deliveries: D,
}

/// The operations a consumer needs from the component owning broker connections.
///
/// A single pool is usually shared by every consumer of a process; the pool decides when
/// connections are reused across consumers.
#[async_trait::async_trait]
pub trait ConnectionPool: Send + Sync + 'static {
    type Connection: BrokerConnection;
    type Channel: BrokerChannel;
    /// What a single message read off a channel looks like.
    type Delivery: Send + 'static;
    type Deliveries: Stream<Item = Result<Self::Delivery, Error>> + Send + Unpin + 'static;

    /// Get a connection to the broker described by `config`, opening one if needed.
    async fn acquire(
        &self,
        config: &ConnectionConfig,
        tag: &str,
    ) -> Result<AcquiredConnection<Self::Connection>, Error>;

    /// Open a channel on `connection` and start consuming from `request.queue`.
    async fn create_consumer_channel(
        &self,
        connection: &Self::Connection,
        request: ChannelRequest<'_>,
    ) -> Result<ConsumerChannel<Self::Channel, Self::Deliveries>, Error>;

    async fn close_connection(&self, connection: &Self::Connection);

    async fn close_channel(&self, channel: &Self::Channel);
}
