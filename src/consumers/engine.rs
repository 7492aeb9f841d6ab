//! The reconnection state machine behind a [`Consumer`](super::Consumer).
//!
//! One engine runs on its own task for the whole life of a consumer. It goes through
//! _generations_: each one acquires a connection and a consumer channel from the pool,
//! forwards deliveries until something breaks, then releases what it acquired and starts
//! over. Closing the consumer ends the current generation and drains in-flight envelopes.
use crate::amqp::configuration::ConnectionConfig;
use crate::consumers::config::{ConsumerConfig, Liveness};
use crate::consumers::envelope::{Completion, Envelope};
use crate::consumers::metrics::Sample;
use crate::pool::{
    BrokerChannel, BrokerConnection, ChannelRequest, CloseSignals, ConnectionPool, Error,
};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Buffer between a close notifier and the engine.
///
/// Sized generously so the notifier never has to drop a signal.
pub(crate) const CLOSE_SIGNAL_BUFFER: usize = 8096;

pub(crate) struct Engine<P: ConnectionPool> {
    pub(crate) pool: Arc<P>,
    pub(crate) connection: ConnectionConfig,
    pub(crate) config: ConsumerConfig,
    pub(crate) output: mpsc::Sender<Envelope<P::Delivery>>,
    pub(crate) in_flight: TaskTracker,
    pub(crate) shutdown: CancellationToken,
}

/// The resources borrowed from the pool for one generation.
struct Generation<P: ConnectionPool> {
    connection: P::Connection,
    channel: P::Channel,
    deliveries: P::Deliveries,
    /// Only watched when the connection was opened for this generation.
    connection_closed: Option<CloseSignals>,
    channel_closed: CloseSignals,
    last_delivery: Instant,
    rebuild_channel: Arc<AtomicBool>,
}

/// How a generation ended.
enum Outcome<C> {
    /// The resources were released, a new generation must be acquired.
    Faulted,
    /// The consumer is closing; the channel is still open.
    Closing(C),
}

/// Whatever woke the engine up while serving.
enum Signal<D> {
    Shutdown,
    ConnectionClosed(Option<Error>),
    ChannelClosed(Option<Error>),
    Heartbeat,
    MetricsDue,
    Delivery(Option<Result<D, Error>>),
}

impl<P: ConnectionPool> Engine<P> {
    #[tracing::instrument(skip_all, name = "consumer_run", fields(queue = %self.config.queue))]
    pub(crate) async fn run(self) {
        let liveness = self.config.liveness.sanitized();
        let host: Arc<str> = self.connection.host().into();
        let queue: Arc<str> = self.config.queue.as_str().into();
        let mut heartbeat = ticker(liveness.heartbeat_interval);
        let mut metrics = ticker(self.config.metrics_interval());

        let mut open_channel = None;
        while !self.shutdown.is_cancelled() {
            let Some(generation) = self.acquire(&liveness).await else {
                continue;
            };
            tracing::info!("Consuming from RabbitMQ queue");
            let outcome = self
                .serve(generation, &liveness, &host, &queue, &mut heartbeat, &mut metrics)
                .await;
            if let Outcome::Closing(channel) = outcome {
                open_channel = Some(channel);
            }
        }

        self.drain(open_channel).await;
    }

    /// Get a connection and a consumer channel from the pool.
    ///
    /// On failure, whatever was obtained is released and `None` is returned after the
    /// reconnect backoff.
    async fn acquire(&self, liveness: &Liveness) -> Option<Generation<P>> {
        let acquired = match self.pool.acquire(&self.connection, &self.config.tag).await {
            Ok(acquired) => acquired,
            Err(e) => {
                tracing::error!(error = ?e, "Failed to acquire a RabbitMQ connection");
                self.backoff(liveness).await;
                return None;
            }
        };
        let request = ChannelRequest {
            tag: &self.config.tag,
            queue: &self.config.queue,
            priority: self.config.priority,
            prefetch_count: self.config.prefetch_count,
        };
        let consumer_channel = match self
            .pool
            .create_consumer_channel(&acquired.connection, request)
            .await
        {
            Ok(consumer_channel) => consumer_channel,
            Err(e) => {
                tracing::error!(error = ?e, "Failed to create a RabbitMQ consumer channel");
                self.pool.close_connection(&acquired.connection).await;
                self.backoff(liveness).await;
                return None;
            }
        };

        let channel_closed = consumer_channel.channel.notify_close(CLOSE_SIGNAL_BUFFER);
        let connection_closed = acquired
            .is_new
            .then(|| acquired.connection.notify_close(CLOSE_SIGNAL_BUFFER));
        Some(Generation {
            connection: acquired.connection,
            channel: consumer_channel.channel,
            deliveries: consumer_channel.deliveries,
            connection_closed,
            channel_closed,
            last_delivery: Instant::now(),
            rebuild_channel: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn backoff(&self, liveness: &Liveness) {
        tokio::select! {
            _ = tokio::time::sleep(liveness.reconnect_backoff) => {}
            _ = self.shutdown.cancelled() => {}
        }
    }

    /// Forward deliveries until the generation breaks or the consumer closes.
    async fn serve(
        &self,
        mut generation: Generation<P>,
        liveness: &Liveness,
        host: &Arc<str>,
        queue: &Arc<str>,
        heartbeat: &mut Interval,
        metrics: &mut Interval,
    ) -> Outcome<P::Channel> {
        loop {
            if self.shutdown.is_cancelled() {
                return Outcome::Closing(generation.channel);
            }

            let signal = tokio::select! {
                // Shutdown first, then faults, then timers, then deliveries.
                biased;

                _ = self.shutdown.cancelled() => Signal::Shutdown,
                closed = next_close_signal(&mut generation.connection_closed) => {
                    Signal::ConnectionClosed(closed)
                }
                closed = generation.channel_closed.recv() => Signal::ChannelClosed(closed),
                _ = heartbeat.tick() => Signal::Heartbeat,
                _ = metrics.tick() => Signal::MetricsDue,
                delivery = generation.deliveries.next() => Signal::Delivery(delivery),
            };

            match signal {
                Signal::Shutdown => return Outcome::Closing(generation.channel),
                Signal::ConnectionClosed(error) => {
                    if let Some(e) = error {
                        tracing::error!(error = ?e, "RabbitMQ consumer connection error");
                    }
                    if let Some(signals) = generation.connection_closed.take() {
                        tokio::spawn(drain_close_signals(signals));
                    }
                    self.pool.close_connection(&generation.connection).await;
                    return Outcome::Faulted;
                }
                Signal::ChannelClosed(error) => {
                    if let Some(e) = error {
                        tracing::error!(error = ?e, "RabbitMQ consumer channel error");
                    }
                    let Generation {
                        channel,
                        channel_closed,
                        ..
                    } = generation;
                    tokio::spawn(drain_close_signals(channel_closed));
                    self.pool.close_channel(&channel).await;
                    return Outcome::Faulted;
                }
                Signal::Heartbeat => {
                    let idle = generation.last_delivery.elapsed();
                    let rebuild_requested = generation.rebuild_channel.load(Ordering::Acquire);
                    if rebuild_requested {
                        tracing::error!(
                            idle_seconds = idle.as_secs(),
                            "Rebuilding RabbitMQ channel after a delivery failed to be processed"
                        );
                    } else if idle > liveness.staleness_window {
                        tracing::warn!(
                            idle_seconds = idle.as_secs(),
                            "Rebuilding RabbitMQ channel after a period without deliveries"
                        );
                    } else {
                        continue;
                    }
                    self.pool.close_channel(&generation.channel).await;
                    return Outcome::Faulted;
                }
                Signal::MetricsDue => Sample {
                    channel: generation.channel.clone(),
                    metrics: self.config.metrics.clone(),
                    host: Arc::clone(host),
                    queue: Arc::clone(queue),
                }
                .spawn(),
                Signal::Delivery(None) => {
                    tracing::warn!("RabbitMQ delivery stream ended");
                    self.pool.close_channel(&generation.channel).await;
                    return Outcome::Faulted;
                }
                Signal::Delivery(Some(Err(e))) => {
                    tracing::error!(error = ?e, "RabbitMQ consumer channel error");
                    self.pool.close_channel(&generation.channel).await;
                    return Outcome::Faulted;
                }
                Signal::Delivery(Some(Ok(delivery))) => {
                    generation.last_delivery = Instant::now();
                    // Waiting for room in the output queue stops us from reading the
                    // channel: a slow application throttles the broker. A delivery read
                    // off the channel is always handed over, closing or not.
                    let Ok(permit) = self.output.reserve().await else {
                        // The consumer handle is gone, nobody is left to read envelopes.
                        return Outcome::Closing(generation.channel);
                    };
                    let completion = Completion::new(
                        Arc::clone(&generation.rebuild_channel),
                        self.in_flight.token(),
                        Arc::clone(queue),
                    );
                    permit.send(Envelope::new(
                        delivery,
                        Arc::clone(host),
                        Arc::clone(queue),
                        completion,
                    ));
                }
            }
        }
    }

    /// Wait for every emitted envelope to be completed, then release the channel and
    /// close the output queue.
    async fn drain(self, open_channel: Option<P::Channel>) {
        tracing::info!(
            in_flight = self.in_flight.len(),
            "Draining RabbitMQ consumer"
        );
        self.in_flight.close();
        self.in_flight.wait().await;
        if let Some(channel) = open_channel {
            self.pool.close_channel(&channel).await;
        }
        drop(self.output);
        tracing::info!("RabbitMQ consumer closed");
    }
}

/// A ticker whose first tick happens one `period` from now.
fn ticker(period: std::time::Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Wait for the next close-signal; never resolves if nothing is being watched.
async fn next_close_signal(signals: &mut Option<CloseSignals>) -> Option<Error> {
    match signals {
        Some(signals) => signals.recv().await,
        None => std::future::pending().await,
    }
}

/// Consume what is left of a close-signal stream so the notifier never finds it full.
async fn drain_close_signals(mut signals: CloseSignals) {
    while signals.recv().await.is_some() {}
}
