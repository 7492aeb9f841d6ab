//! Facilities to consume messages from a RabbitMq queue. Check out [`Consumer`] as a
//! starting point.
pub use config::{ConsumerConfig, ConsumerSettings, Liveness, DEFAULT_PREFETCH_COUNT};
pub use consumer::Consumer;
pub use envelope::Envelope;
pub use metrics::{QueueDelayReporter, QueueLengthReporter, QueueMetrics};

mod config;
mod consumer;
mod engine;
mod envelope;
mod metrics;
