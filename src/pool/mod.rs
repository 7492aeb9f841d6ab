//! The connection pool consumers borrow their broker resources from.
//!
//! [`ConnectionPool`] is the contract a [`Consumer`](crate::consumers::Consumer) drives:
//! acquire a (possibly shared) connection, open a dedicated consumer channel on it, close
//! either when it breaks.
//! [`SharedConnectionPool`] implements it on top of [`lapin`], reusing a healthy
//! connection across consumers with the same address and tag.
//!
//! ```rust
//! use carrot_sentinel::amqp::configuration::ConnectionConfig;
//! use carrot_sentinel::pool::{ConnectionPool, SharedConnectionPool};
//!
//! // Function for asyncness.
//! async fn example() -> anyhow::Result<()> {
//!     let pool = SharedConnectionPool::new();
//!     let config = ConnectionConfig::new("localhost:5672");
//!
//!     let first = pool.acquire(&config, "billing").await?;
//!     let second = pool.acquire(&config, "billing").await?;
//!     assert!(first.is_new);
//!     assert!(!second.is_new);
//!     Ok(())
//! }
//! ```

mod channel;
mod connection;
mod error;
mod shared;
mod transport;

pub use connection::PooledConnection;
pub use error::Error;
pub use shared::SharedConnectionPool;
pub use transport::{
    AcquiredConnection, BrokerChannel, BrokerConnection, ChannelRequest, CloseSignals,
    ConnectionPool, ConsumerChannel,
};
