use rdkafka::error::KafkaError;
use thiserror::Error;

/// Errors surfaced by the consumer driver.
///
/// Only `Stopping` originates in the driver itself; the client variants pass
/// the underlying Kafka error through untouched so callers can inspect broker
/// error codes.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The Kafka client failed during assign/subscribe/seek/poll or while
    /// issuing a commit. Fatal: the driver terminates and the supervising
    /// parent decides whether to restart it.
    #[error("kafka client error: {0}")]
    Client(#[source] KafkaError),

    /// The broker rejected an offset commit. Reported to the committer only;
    /// the driver keeps running.
    #[error("offset commit failed: {0}")]
    Commit(#[source] KafkaError),

    /// Work arrived after `Stop`, or the driver has already terminated.
    #[error("consumer driver is stopping and no longer accepts requests")]
    Stopping,

    /// Records arrived for a partition nobody requested. Either a driver bug
    /// or a client that ignored `pause`.
    #[error("consumer driver invariant violated: {0}")]
    InvariantViolation(String),
}
