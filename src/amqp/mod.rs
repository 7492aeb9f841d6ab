//! Helpers for connecting to a rabbitmq broker

pub mod configuration;
pub mod convenience;
mod delivery;
mod factory;
pub use delivery::Delivery;
pub use factory::ConnectionFactory;
pub use lapin::{Channel, Connection};

pub use lapin::{options, types, BasicProperties};
