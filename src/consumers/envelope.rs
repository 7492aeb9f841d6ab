use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::task::task_tracker::TaskTrackerToken;

/// A delivery handed over to the application, ready for processing.
///
/// Every envelope must be completed exactly once, with [`Envelope::complete`] (or
/// [`Envelope::done`]), when the application is finished with it. Until then it counts as
/// in flight: [`Consumer::close`](crate::consumers::Consumer::close) waits for every
/// emitted envelope to be completed before releasing the channel.
///
/// Completing with an error does not stop the consumer, but it marks the channel the
/// delivery came from for a rebuild at the next heartbeat: a failing downstream handler
/// often goes hand in hand with a broken channel.
pub struct Envelope<D> {
    delivery: D,
    host: Arc<str>,
    queue: Arc<str>,
    completion: Completion,
}

/// The bookkeeping released when an envelope is completed.
pub(crate) struct Completion {
    /// Raised on an application-reported error; shared by every envelope of a generation.
    rebuild_channel: Arc<AtomicBool>,
    in_flight: Option<TaskTrackerToken>,
    queue: Arc<str>,
}

impl Completion {
    pub(crate) fn new(
        rebuild_channel: Arc<AtomicBool>,
        in_flight: TaskTrackerToken,
        queue: Arc<str>,
    ) -> Self {
        Self {
            rebuild_channel,
            in_flight: Some(in_flight),
            queue,
        }
    }

    fn settle<E: fmt::Display>(mut self, outcome: Result<(), E>) {
        if let Err(e) = outcome {
            tracing::error!(
                queue = %self.queue,
                error = %e,
                "Failed to process a RabbitMQ delivery"
            );
            self.rebuild_channel.store(true, Ordering::Release);
        }
        self.in_flight.take();
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.in_flight.take().is_some() {
            tracing::warn!(
                queue = %self.queue,
                "A RabbitMQ delivery was dropped without being completed"
            );
        }
    }
}

impl<D> Envelope<D> {
    pub(crate) fn new(
        delivery: D,
        host: Arc<str>,
        queue: Arc<str>,
        completion: Completion,
    ) -> Self {
        Self {
            delivery,
            host,
            queue,
            completion,
        }
    }

    /// The message as received from the broker.
    pub fn delivery(&self) -> &D {
        &self.delivery
    }

    /// The host of the broker the message was received from.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The queue the message was consumed from.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Report the outcome of processing and release the envelope.
    pub fn complete<E: fmt::Display>(self, outcome: Result<(), E>) {
        self.completion.settle(outcome);
    }

    /// Shorthand for completing with success.
    pub fn done(self) {
        self.complete(Ok::<(), std::convert::Infallible>(()))
    }

    /// Complete with success and keep the delivery, e.g. to acknowledge it with the broker
    /// after processing.
    pub fn into_delivery(self) -> D {
        let Self {
            delivery,
            completion,
            ..
        } = self;
        completion.settle(Ok::<(), std::convert::Infallible>(()));
        delivery
    }
}

impl<D: fmt::Debug> fmt::Debug for Envelope<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("delivery", &self.delivery)
            .field("host", &self.host)
            .field("queue", &self.queue)
            .finish()
    }
}
