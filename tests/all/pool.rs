//! These tests talk to a real broker, listening on `RABBITMQ_ADDRESS` (`localhost:5672` by
//! default). Run them with `cargo test -- --ignored`.
use carrot_sentinel::amqp::configuration::ConnectionConfig;
use carrot_sentinel::amqp::options::{BasicPublishOptions, QueueDeclareOptions};
use carrot_sentinel::amqp::types::FieldTable;
use carrot_sentinel::amqp::BasicProperties;
use carrot_sentinel::consumers::{Consumer, ConsumerConfig};
use carrot_sentinel::pool::{
    BrokerChannel, ChannelRequest, ConnectionPool, PooledConnection, SharedConnectionPool,
};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

fn broker() -> ConnectionConfig {
    let address = std::env::var("RABBITMQ_ADDRESS").unwrap_or_else(|_| "localhost:5672".into());
    ConnectionConfig::new(address)
}

async fn declare_queue(connection: &PooledConnection) -> String {
    let queue = Uuid::new_v4().to_string();
    let channel = connection.create_channel().await.unwrap();
    channel
        .queue_declare(
            &queue,
            QueueDeclareOptions {
                auto_delete: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .unwrap();
    queue
}

async fn publish(connection: &PooledConnection, queue: &str, sent_at: Option<SystemTime>) {
    let mut properties = BasicProperties::default();
    if let Some(sent_at) = sent_at {
        let seconds = sent_at.duration_since(UNIX_EPOCH).unwrap().as_secs();
        properties = properties.with_timestamp(seconds);
    }
    let channel = connection.create_channel().await.unwrap();
    channel
        .basic_publish(
            "",
            queue,
            BasicPublishOptions::default(),
            b"Not relevant",
            properties,
        )
        .await
        .unwrap()
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker"]
async fn connections_are_shared_per_consumer_tag() {
    // Arrange
    let pool = SharedConnectionPool::new();
    let config = broker();

    // Act
    let first = pool.acquire(&config, "billing").await.unwrap();
    let second = pool.acquire(&config, "billing").await.unwrap();
    let other = pool.acquire(&config, "invoicing").await.unwrap();

    // Assert
    assert!(first.is_new);
    assert!(!second.is_new);
    assert!(first.connection.same_as(&second.connection));
    assert!(other.is_new);
    assert!(!other.connection.same_as(&first.connection));
    assert_eq!(2, pool.len().await);
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker"]
async fn a_closed_connection_is_evicted_from_the_pool() {
    // Arrange
    let pool = SharedConnectionPool::new();
    let config = broker();
    let first = pool.acquire(&config, "billing").await.unwrap();

    // Act
    pool.close_connection(&first.connection).await;
    let second = pool.acquire(&config, "billing").await.unwrap();

    // Assert
    assert!(!first.connection.is_healthy());
    assert!(second.is_new);
    assert!(second.connection.is_healthy());
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker"]
async fn queue_depth_and_the_oldest_timestamp_can_be_inspected() {
    // Arrange
    let pool = SharedConnectionPool::new();
    let acquired = pool.acquire(&broker(), "inspector").await.unwrap();
    let queue = declare_queue(&acquired.connection).await;
    let sent_at = SystemTime::now() - Duration::from_secs(30);
    publish(&acquired.connection, &queue, Some(sent_at)).await;
    publish(&acquired.connection, &queue, None).await;
    let channel = acquired.connection.create_channel().await.unwrap();

    // Act
    let oldest = channel.peek_timestamp(&queue).await.unwrap().unwrap();
    let depth = channel.queue_depth(&queue).await.unwrap();

    // Assert
    let delay = SystemTime::now().duration_since(oldest).unwrap();
    assert!(delay >= Duration::from_secs(29));
    // The peeked message went back to the queue.
    assert_eq!(2, depth);
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker"]
async fn a_consumer_channel_receives_messages_published_to_its_queue() {
    // Arrange
    let pool = SharedConnectionPool::new();
    let acquired = pool.acquire(&broker(), "receiver").await.unwrap();
    let queue = declare_queue(&acquired.connection).await;
    let request = ChannelRequest {
        tag: "receiver",
        queue: &queue,
        priority: Some(3),
        prefetch_count: 5,
    };
    let mut consumer = pool
        .create_consumer_channel(&acquired.connection, request)
        .await
        .unwrap();

    // Act
    publish(&acquired.connection, &queue, None).await;
    let delivery = consumer.deliveries.next().await.unwrap().unwrap();

    // Assert
    assert_eq!(b"Not relevant".to_vec(), delivery.data);
    delivery.ack().await.unwrap();
    assert!(consumer.channel.is_open());
    pool.close_channel(&consumer.channel).await;
    assert!(!consumer.channel.is_open());
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker"]
async fn a_consumer_hands_out_messages_published_to_its_queue() {
    // Arrange
    let pool = Arc::new(SharedConnectionPool::new());
    let acquired = pool.acquire(&broker(), "publisher").await.unwrap();
    let queue = declare_queue(&acquired.connection).await;
    let consumer = Consumer::start(
        Arc::clone(&pool),
        broker(),
        ConsumerConfig::new(queue.clone()).with_tag("end-to-end"),
    );

    // Act
    publish(&acquired.connection, &queue, None).await;
    let envelope = tokio::time::timeout(Duration::from_secs(30), consumer.next())
        .await
        .unwrap()
        .unwrap();

    // Assert
    assert_eq!(broker().host(), envelope.host());
    assert_eq!(queue, envelope.queue());
    let outcome = envelope.delivery().ack().await;
    envelope.complete(outcome);
    consumer.close().await;
    assert_eq!(2, pool.len().await);
}
