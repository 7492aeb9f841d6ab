use crate::amqp::configuration::ConnectionConfig;
use crate::consumers::config::ConsumerConfig;
use crate::consumers::engine::Engine;
use crate::consumers::envelope::Envelope;
use crate::pool::ConnectionPool;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// A RabbitMq consumer that survives broken channels and connections.
///
/// `Consumer` runs a background task that borrows a connection and a consumer channel from
/// a [`ConnectionPool`], forwards every delivery to the application as an [`Envelope`] and,
/// whenever the channel or the connection breaks (or silently stops delivering), releases
/// them and acquires fresh ones. The application never sees the disruption: it keeps
/// pulling envelopes with [`Consumer::next`].
///
/// # Shutdown
///
/// [`Consumer::close`] stops consuming, waits until every envelope handed out so far has
/// been completed, releases the channel and then ends the envelope stream.
/// Deliveries already read off the channel are still handed out, and envelopes waiting
/// in the stream count as in flight: keep calling [`Consumer::next`] (from another task)
/// until it returns `None`, otherwise `close` waits for them forever.
///
/// Dropping a `Consumer` stops the background task without waiting for it.
pub struct Consumer<D> {
    queue: String,
    envelopes: Mutex<mpsc::Receiver<Envelope<D>>>,
    shutdown: CancellationToken,
    engine: Mutex<Option<JoinHandle<()>>>,
}

impl<D: Send + 'static> Consumer<D> {
    /// Start consuming from `config.queue`, using connections from `pool`.
    ///
    /// The first connection is acquired in the background: `start` returns immediately.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<P>(pool: Arc<P>, connection: ConnectionConfig, config: ConsumerConfig) -> Self
    where
        P: ConnectionPool<Delivery = D>,
    {
        let (output, envelopes) = mpsc::channel(config.output_capacity());
        let shutdown = CancellationToken::new();
        let queue = config.queue.clone();
        let engine = Engine {
            pool,
            connection,
            config,
            output,
            in_flight: TaskTracker::new(),
            shutdown: shutdown.clone(),
        };
        Self {
            queue,
            envelopes: Mutex::new(envelopes),
            shutdown,
            engine: Mutex::new(Some(tokio::spawn(engine.run()))),
        }
    }

    /// The queue this consumer reads from.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Wait for the next envelope.
    ///
    /// Envelopes come out in the order the broker delivered them. `None` once the consumer
    /// has been closed and fully drained.
    /// Concurrent callers each get a different envelope.
    pub async fn next(&self) -> Option<Envelope<D>> {
        self.envelopes.lock().await.recv().await
    }

    /// Stop consuming and wait for in-flight envelopes to be completed.
    ///
    /// Calling `close` more than once, sequentially or concurrently, is harmless: every
    /// call returns once the consumer is closed.
    pub async fn close(&self) {
        let mut engine = self.engine.lock().await;
        let Some(handle) = engine.take() else {
            return;
        };
        self.shutdown.cancel();
        if let Err(e) = handle.await {
            tracing::error!(queue = %self.queue, error = %e, "RabbitMQ consumer task failed");
        }
    }

    /// Wait for `signal`, then [`close`](Consumer::close) the consumer.
    ///
    /// E.g. with the `wait_for_signal` future of a `shutdown_handler::ShutdownHandler` to
    /// drain consumers on SIGTERM.
    pub async fn close_on_shutdown(&self, signal: impl Future<Output = ()>) {
        signal.await;
        tracing::info!(queue = %self.queue, "Consumer received shutdown event");
        self.close().await;
    }

    /// `true` once [`close`](Consumer::close) has been called.
    pub fn is_closing(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl<D> Drop for Consumer<D> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
