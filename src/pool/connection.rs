//! Implements [`BrokerConnection`] for a shared [`lapin::Connection`].

use crate::pool::transport::{BrokerConnection, CloseSignals};
use lapin::{Connection, ConnectionState};
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A [`Connection`] that can be handed out to several consumers at once.
#[derive(Clone)]
pub struct PooledConnection(Arc<Connection>);

impl PooledConnection {
    pub(crate) fn new(connection: Connection) -> Self {
        Self(Arc::new(connection))
    }

    /// A connection can be handed out again only while it is fully open.
    pub fn is_healthy(&self) -> bool {
        matches!(self.0.status().state(), ConnectionState::Connected)
    }

    /// `true` if both handles point to the same underlying connection.
    pub fn same_as(&self, other: &PooledConnection) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.0
    }
}

impl BrokerConnection for PooledConnection {
    fn notify_close(&self, capacity: usize) -> CloseSignals {
        let (sender, receiver) = mpsc::channel(capacity);
        self.0.on_error(move |e| {
            let _ = sender.try_send(e.into());
        });
        receiver
    }
}
