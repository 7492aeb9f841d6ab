use crate::helpers::{start_consumer, StubPool};
use carrot_sentinel::consumers::ConsumerConfig;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn a_channel_error_rebuilds_the_channel() {
    // Arrange
    let pool = StubPool::new();
    let first = pool.script();
    let second = pool.script();
    first.deliver(1);
    let consumer = start_consumer(&pool, ConsumerConfig::new("orders"));
    consumer.next().await.unwrap().done();

    // Act
    first
        .channel
        .state
        .notifier
        .fail("PRECONDITION_FAILED - unknown delivery tag 1");
    second.deliver(2);

    // Assert
    assert_eq!(2, consumer.next().await.unwrap().into_delivery());
    assert_eq!(vec![first.channel.id], pool.closed_channels());
    assert_eq!(0, pool.closed_connections());
    assert_eq!(2, pool.acquisitions());
}

#[tokio::test(start_paused = true)]
async fn an_error_on_the_delivery_stream_rebuilds_the_channel() {
    // Arrange
    let pool = StubPool::new();
    let first = pool.script();
    let second = pool.script();
    let consumer = start_consumer(&pool, ConsumerConfig::new("orders"));

    // Act
    first.fail_stream("unexpected frame");
    second.deliver(2);

    // Assert
    assert_eq!(2, consumer.next().await.unwrap().into_delivery());
    assert_eq!(vec![first.channel.id], pool.closed_channels());
}

#[tokio::test(start_paused = true)]
async fn a_delivery_stream_that_ends_is_rebuilt() {
    // Arrange
    let pool = StubPool::new();
    let first = pool.script();
    let second = pool.script();
    let first_channel = first.channel.id;
    let consumer = start_consumer(&pool, ConsumerConfig::new("orders"));

    // Act
    first.end_stream();
    second.deliver(2);

    // Assert
    assert_eq!(2, consumer.next().await.unwrap().into_delivery());
    assert_eq!(vec![first_channel], pool.closed_channels());
}

#[tokio::test(start_paused = true)]
async fn a_connection_error_releases_the_connection_and_acquires_a_new_one() {
    // Arrange
    let pool = StubPool::new();
    let first = pool.script();
    let second = pool.script();
    first.deliver(1);
    let consumer = start_consumer(&pool, ConsumerConfig::new("orders"));
    consumer.next().await.unwrap().done();

    // Act
    first
        .connection
        .fail("CONNECTION_FORCED - broker forced connection closure");
    second.deliver(2);

    // Assert
    assert_eq!(2, consumer.next().await.unwrap().into_delivery());
    assert_eq!(1, pool.closed_connections());
    assert_eq!(2, pool.acquisitions());
}

#[tokio::test(start_paused = true)]
async fn a_connection_closed_without_an_error_is_replaced_as_well() {
    // Arrange
    let pool = StubPool::new();
    let first = pool.script();
    let second = pool.script();
    first.deliver(1);
    let consumer = start_consumer(&pool, ConsumerConfig::new("orders"));
    consumer.next().await.unwrap().done();

    // Act
    first.connection.close();
    second.deliver(2);

    // Assert
    assert_eq!(2, consumer.next().await.unwrap().into_delivery());
    assert_eq!(1, pool.closed_connections());
}

#[tokio::test(start_paused = true)]
async fn a_connection_shared_with_other_consumers_is_not_watched() {
    // Arrange
    let pool = StubPool::new();
    pool.reuse_connections();
    let generation = pool.script();
    generation.deliver(1);

    // Act
    let consumer = start_consumer(&pool, ConsumerConfig::new("orders"));
    consumer.next().await.unwrap().done();

    // Assert
    assert!(!generation.connection.is_watched());
    assert!(generation.channel.state.notifier.is_watched());
}

#[tokio::test(start_paused = true)]
async fn failed_acquisitions_are_retried_after_a_backoff() {
    // Arrange
    let pool = StubPool::new();
    pool.fail_acquisitions(3);
    let generation = pool.script();
    generation.deliver(1);
    let started = Instant::now();

    // Act
    let consumer = start_consumer(&pool, ConsumerConfig::new("orders"));
    let envelope = consumer.next().await.unwrap();

    // Assert
    assert_eq!(1, *envelope.delivery());
    assert_eq!(4, pool.acquisitions());
    assert!(started.elapsed() >= Duration::from_secs(3));
    envelope.done();
}

#[tokio::test(start_paused = true)]
async fn a_connection_is_released_when_no_channel_can_be_opened_on_it() {
    // Arrange
    let pool = StubPool::new();
    pool.fail_channels(1);
    let generation = pool.script();
    generation.deliver(1);

    // Act
    let consumer = start_consumer(&pool, ConsumerConfig::new("orders"));
    let envelope = consumer.next().await.unwrap();

    // Assert
    assert_eq!(1, *envelope.delivery());
    assert_eq!(1, pool.closed_connections());
    assert_eq!(2, pool.acquisitions());
    envelope.done();
}
