use carrot_sentinel::amqp::configuration::ConnectionConfig;
use carrot_sentinel::consumers::{Consumer, ConsumerConfig, QueueMetrics};
use carrot_sentinel::pool::SharedConnectionPool;
use shutdown_handler::ShutdownHandler;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // We are using the out-of-the-box parameters for the default RabbitMq Docker image.
    let connection = ConnectionConfig::new("localhost:5672");

    // Consumers borrow their connections from a pool. Consumers sharing a tag share a
    // connection, while each of them always gets its own channel.
    let pool = Arc::new(SharedConnectionPool::new());

    // Every 15 seconds, report how many messages are waiting and how old the oldest one is.
    let metrics = QueueMetrics::default()
        .with_queue_length(|host: &str, queue: &str, length: u64| {
            tracing::info!(host, queue, length, "Queue length");
        })
        .with_queue_delay(|host: &str, queue: &str, delay_seconds: u64| {
            tracing::info!(host, queue, delay_seconds, "Queue delay");
        })
        .check_every(Duration::from_secs(15));

    let consumer = Arc::new(Consumer::start(
        pool,
        connection,
        ConsumerConfig::new("hello")
            .with_prefetch_count(10)
            .with_metrics(metrics),
    ));

    // On SIGTERM the consumer stops pulling from the broker, waits for the envelopes we are
    // still working on and then ends the stream below.
    let shutdown = ShutdownHandler::sigterm()?;
    tokio::spawn({
        let consumer = Arc::clone(&consumer);
        async move { consumer.close_on_shutdown(shutdown.wait_for_signal()).await }
    });

    // Broken channels and dropped connections are rebuilt behind the scenes: this loop only
    // ends once the consumer has been closed.
    while let Some(envelope) = consumer.next().await {
        tracing::info!(
            bytes = envelope.delivery().data.len(),
            queue = envelope.queue(),
            "Received a message"
        );
        // Completing with an error asks the consumer to rebuild its channel.
        let outcome = envelope.delivery().ack().await;
        envelope.complete(outcome);
    }

    Ok(())
}
