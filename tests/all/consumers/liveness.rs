use crate::helpers::{advance, start_consumer, StubPool};
use carrot_sentinel::consumers::{ConsumerConfig, Liveness};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn a_channel_without_deliveries_for_too_long_is_rebuilt() {
    // Arrange
    let pool = StubPool::new();
    let first = pool.script();
    let _second = pool.script();
    let _consumer = start_consumer(&pool, ConsumerConfig::new("orders"));

    // Act & Assert
    advance(4 * 60).await;
    assert!(pool.closed_channels().is_empty());
    assert_eq!(1, pool.acquisitions());

    advance(65).await;
    assert_eq!(vec![first.channel.id], pool.closed_channels());
    assert_eq!(2, pool.acquisitions());
}

#[tokio::test(start_paused = true)]
async fn deliveries_keep_the_channel_alive() {
    // Arrange
    let pool = StubPool::new();
    let generation = pool.script();
    let consumer = start_consumer(&pool, ConsumerConfig::new("orders"));

    // Act
    for message in 0..4 {
        advance(2 * 60).await;
        generation.deliver(message);
        consumer.next().await.unwrap().done();
    }

    // Assert
    assert!(pool.closed_channels().is_empty());
    assert_eq!(1, pool.acquisitions());
}

#[tokio::test(start_paused = true)]
async fn the_staleness_window_can_be_tuned() {
    // Arrange
    let pool = StubPool::new();
    let first = pool.script();
    let _second = pool.script();
    let liveness = Liveness {
        staleness_window: Duration::from_secs(30),
        ..Liveness::default()
    };
    let _consumer = start_consumer(&pool, ConsumerConfig::new("orders").with_liveness(liveness));

    // Act
    advance(35).await;

    // Assert
    assert_eq!(vec![first.channel.id], pool.closed_channels());
}

#[tokio::test(start_paused = true)]
async fn a_delivery_completed_with_an_error_rebuilds_the_channel_at_the_next_heartbeat() {
    // Arrange
    let pool = StubPool::new();
    let first = pool.script();
    let second = pool.script();
    first.deliver(1);
    let consumer = start_consumer(&pool, ConsumerConfig::new("orders"));

    // Act
    consumer
        .next()
        .await
        .unwrap()
        .complete(Err("downstream service unavailable"));
    advance(2).await;

    // Assert
    assert_eq!(vec![first.channel.id], pool.closed_channels());
    assert_eq!(0, pool.closed_connections());
    second.deliver(2);
    assert_eq!(2, consumer.next().await.unwrap().into_delivery());
}

#[tokio::test(start_paused = true)]
async fn a_delivery_completed_successfully_leaves_the_channel_alone() {
    // Arrange
    let pool = StubPool::new();
    let generation = pool.script();
    generation.deliver(1);
    let consumer = start_consumer(&pool, ConsumerConfig::new("orders"));

    // Act
    consumer.next().await.unwrap().complete(Ok::<(), String>(()));
    advance(2).await;

    // Assert
    assert!(pool.closed_channels().is_empty());
    assert_eq!(1, pool.acquisitions());
}
