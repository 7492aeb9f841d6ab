use lapin::BasicProperties;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Convenience methods for [`lapin::BasicProperties`].
pub trait BasicPropertiesExt {
    /// The `timestamp` property stamped by the publisher, if any.
    ///
    /// AMQP timestamps have a resolution of one second.
    fn sent_at(&self) -> Option<SystemTime>;
}

impl BasicPropertiesExt for BasicProperties {
    fn sent_at(&self) -> Option<SystemTime> {
        (*self.timestamp()).map(|seconds| UNIX_EPOCH + Duration::from_secs(seconds))
    }
}
