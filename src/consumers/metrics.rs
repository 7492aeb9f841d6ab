//! Periodic sampling of queue depth and queue delay.
//!
//! Sampling runs on its own task, next to the consumer loop: a slow or failing broker
//! query must never hold up deliveries, and nothing that happens here can take the
//! consumer down.
use crate::pool::{BrokerChannel, Error};
use futures_util::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Receives the number of messages ready in a queue.
pub trait QueueLengthReporter: Send + Sync + 'static {
    fn report(&self, host: &str, queue: &str, length: u64);
}

/// Receives how long, in seconds, the oldest message in a queue has been waiting.
pub trait QueueDelayReporter: Send + Sync + 'static {
    fn report(&self, host: &str, queue: &str, delay_seconds: u64);
}

impl<F> QueueLengthReporter for F
where
    F: Fn(&str, &str, u64) + Send + Sync + 'static,
{
    fn report(&self, host: &str, queue: &str, length: u64) {
        self(host, queue, length)
    }
}

impl<F> QueueDelayReporter for F
where
    F: Fn(&str, &str, u64) + Send + Sync + 'static,
{
    fn report(&self, host: &str, queue: &str, delay_seconds: u64) {
        self(host, queue, delay_seconds)
    }
}

/// assert they are object safe
type _CHECK = (Box<dyn QueueLengthReporter>, Box<dyn QueueDelayReporter>);

/// Which queue metrics a consumer reports, and how often.
#[derive(Clone, Default)]
pub struct QueueMetrics {
    queue_length: Option<Arc<dyn QueueLengthReporter>>,
    queue_delay: Option<Arc<dyn QueueDelayReporter>>,
    check_interval: Option<Duration>,
}

impl fmt::Debug for QueueMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueMetrics")
            .field("queue_length", &self.queue_length.is_some())
            .field("queue_delay", &self.queue_delay.is_some())
            .field("check_interval", &self.check_interval)
            .finish()
    }
}

impl QueueMetrics {
    /// Sampling period when no interval is configured: longer than any real run.
    pub const DISABLED_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

    #[must_use]
    pub fn with_queue_length(mut self, reporter: impl QueueLengthReporter) -> Self {
        self.queue_length = Some(Arc::new(reporter));
        self
    }

    #[must_use]
    pub fn with_queue_delay(mut self, reporter: impl QueueDelayReporter) -> Self {
        self.queue_delay = Some(Arc::new(reporter));
        self
    }

    /// Sample the queue every `interval`. A zero interval leaves sampling disabled.
    #[must_use]
    pub fn check_every(mut self, interval: Duration) -> Self {
        self.check_interval = Some(interval);
        self
    }

    pub fn check_interval(&self) -> Option<Duration> {
        self.check_interval.filter(|interval| !interval.is_zero())
    }

    fn has_reporters(&self) -> bool {
        self.queue_length.is_some() || self.queue_delay.is_some()
    }
}

/// What a single sampling pass needs; cloned out of the consumer for every tick.
pub(crate) struct Sample<C> {
    pub(crate) channel: C,
    pub(crate) metrics: Option<QueueMetrics>,
    pub(crate) host: Arc<str>,
    pub(crate) queue: Arc<str>,
}

impl<C: BrokerChannel> Sample<C> {
    /// Run the sampling pass on a detached task.
    pub(crate) fn spawn(self) {
        tokio::spawn(async move {
            let queue = Arc::clone(&self.queue);
            match AssertUnwindSafe(self.collect()).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(
                        queue = %queue,
                        error = ?e,
                        "Unable to collect RabbitMQ queue metrics"
                    );
                }
                Err(panic) => {
                    tracing::warn!(
                        queue = %queue,
                        panic = %panic_message(&*panic),
                        "Collecting RabbitMQ queue metrics panicked"
                    );
                }
            }
        });
    }

    async fn collect(self) -> Result<(), Error> {
        let Some(metrics) = self.metrics.as_ref().filter(|m| m.has_reporters()) else {
            return Ok(());
        };
        if !self.channel.is_open() {
            return Ok(());
        }

        let depth = self.channel.queue_depth(&self.queue).await?;
        if let Some(reporter) = &metrics.queue_length {
            reporter.report(&self.host, &self.queue, u64::from(depth));
        }

        let Some(reporter) = &metrics.queue_delay else {
            return Ok(());
        };
        if depth == 0 {
            reporter.report(&self.host, &self.queue, 0);
            return Ok(());
        }
        match self.channel.peek_timestamp(&self.queue).await? {
            Some(sent_at) => {
                if let Some(delay) = delay_seconds(sent_at, SystemTime::now()) {
                    reporter.report(&self.host, &self.queue, delay);
                }
            }
            None => {
                tracing::debug!(
                    queue = %self.queue,
                    "Oldest message carries no timestamp, skipping queue delay"
                );
            }
        }
        Ok(())
    }
}

/// Whole seconds elapsed between `sent_at` and `now`.
///
/// `None` when `sent_at` lies in the future, i.e. publisher and consumer clocks disagree.
fn delay_seconds(sent_at: SystemTime, now: SystemTime) -> Option<u64> {
    now.duration_since(sent_at).ok().map(|delay| delay.as_secs())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
