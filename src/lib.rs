//! `carrot-sentinel` keeps a RabbitMq consumer alive across broken channels, dropped
//! connections and silently wedged deliveries, built on top of [`lapin`].
//!
//! [`Consumer`](crate::consumers::Consumer) is the best starting point: it borrows its
//! connection from a [`ConnectionPool`](crate::pool::ConnectionPool), hands deliveries to
//! the application as [`Envelope`](crate::consumers::Envelope)s and rebuilds whatever
//! breaks underneath, until it is closed.
//!
//! ```rust,no_run
//! use carrot_sentinel::amqp::configuration::ConnectionConfig;
//! use carrot_sentinel::consumers::{Consumer, ConsumerConfig};
//! use carrot_sentinel::pool::SharedConnectionPool;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let pool = Arc::new(SharedConnectionPool::new());
//! let consumer = Consumer::start(
//!     pool,
//!     ConnectionConfig::new("localhost:5672"),
//!     ConsumerConfig::new("orders").with_prefetch_count(10),
//! );
//!
//! while let Some(envelope) = consumer.next().await {
//!     let outcome = envelope.delivery().ack().await;
//!     envelope.complete(outcome);
//! }
//! # }
//! ```

pub mod amqp;
pub mod consumers;
pub mod pool;
