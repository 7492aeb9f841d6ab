use crate::consumers::metrics::QueueMetrics;
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;
use std::time::Duration;
use uuid::Uuid;

/// Prefetch count used when none is configured.
pub const DEFAULT_PREFETCH_COUNT: u16 = 1;

/// Timers driving the self-healing behaviour of a consumer.
///
/// The defaults suit production traffic; shorter values are mostly useful in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    /// How often the consumer checks whether its channel must be rebuilt.
    pub heartbeat_interval: Duration,
    /// A channel that delivered nothing for this long is assumed to be wedged and rebuilt.
    pub staleness_window: Duration,
    /// How long to wait before retrying after failing to acquire a connection or channel.
    pub reconnect_backoff: Duration,
}

impl Default for Liveness {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            staleness_window: Duration::from_secs(5 * 60),
            reconnect_backoff: Duration::from_secs(1),
        }
    }
}

impl Liveness {
    /// Timers must tick: zero durations are raised to one millisecond.
    pub(crate) fn sanitized(self) -> Self {
        const MIN: Duration = Duration::from_millis(1);
        Self {
            heartbeat_interval: self.heartbeat_interval.max(MIN),
            staleness_window: self.staleness_window,
            reconnect_backoff: self.reconnect_backoff.max(MIN),
        }
    }
}

/// Everything a [`Consumer`](crate::consumers::Consumer) needs to know about the queue it
/// consumes from.
#[derive(Clone)]
pub struct ConsumerConfig {
    /// The name of the queue we will be consuming messages from.
    pub queue: String,
    /// The consumer tag, also used to pick a shared connection from the pool.
    pub tag: String,
    /// Consumer priority. See https://www.rabbitmq.com/consumer-priority.html.
    pub priority: Option<i32>,
    /// The maximum number of unacknowledged deliveries the broker pushes to us.
    ///
    /// It also bounds the number of envelopes waiting to be picked up by the application.
    pub prefetch_count: u16,
    pub metrics: Option<QueueMetrics>,
    pub liveness: Liveness,
}

impl ConsumerConfig {
    /// A consumer for `queue` with a random tag and the default settings.
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            tag: Uuid::new_v4().to_string(),
            priority: None,
            prefetch_count: DEFAULT_PREFETCH_COUNT,
            metrics: None,
            liveness: Liveness::default(),
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn with_prefetch_count(mut self, prefetch_count: u16) -> Self {
        self.prefetch_count = prefetch_count;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: QueueMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn with_liveness(mut self, liveness: Liveness) -> Self {
        self.liveness = liveness;
        self
    }

    /// How often queue metrics are sampled; one year when metrics are not configured.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics
            .as_ref()
            .and_then(QueueMetrics::check_interval)
            .unwrap_or(QueueMetrics::DISABLED_INTERVAL)
    }

    /// Capacity of the queue envelopes are pushed onto.
    pub(crate) fn output_capacity(&self) -> usize {
        usize::from(self.prefetch_count).max(1)
    }
}

#[derive(Debug, Deserialize, Clone)]
/// The serde-friendly subset of [`ConsumerConfig`], e.g. to load consumers from a
/// configuration file.
///
/// Metrics reporters are code, not configuration: attach them with
/// [`ConsumerConfig::with_metrics`] after conversion.
pub struct ConsumerSettings {
    pub queue: String,
    /// A random tag is generated if left unspecified.
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(
        default,
        deserialize_with = "serde_aux::field_attributes::deserialize_option_number_from_string"
    )]
    pub priority: Option<i32>,
    #[serde(
        default = "default_prefetch_count",
        deserialize_with = "deserialize_number_from_string"
    )]
    pub prefetch_count: u16,
}

fn default_prefetch_count() -> u16 {
    DEFAULT_PREFETCH_COUNT
}

impl From<ConsumerSettings> for ConsumerConfig {
    fn from(settings: ConsumerSettings) -> Self {
        let mut config = ConsumerConfig::new(settings.queue)
            .with_prefetch_count(settings.prefetch_count);
        if let Some(tag) = settings.tag {
            config = config.with_tag(tag);
        }
        config.priority = settings.priority;
        config
    }
}
