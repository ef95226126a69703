use std::collections::HashMap;
use std::time::Duration;

use rdkafka::error::KafkaError;
use regex::Regex;

use crate::rebalance::RebalanceListener;
use crate::types::{OffsetAndMetadata, RecordBatch, TopicPartition};

/// Callback fired once the broker acknowledges (or rejects) an async commit.
///
/// The client must invoke it from inside a later `poll` on the polling
/// thread. That guarantee is what lets the driver account for in-flight
/// commits without any locking.
pub type CommitCallback =
    Box<dyn FnOnce(Result<HashMap<TopicPartition, OffsetAndMetadata>, KafkaError>) + Send>;

/// Per-partition fetch suppression. Split out of [`DriverClient`] because a
/// rebalance listener runs while the client is inside `poll` and may only
/// touch this part of the surface.
pub trait PartitionControl {
    fn pause(&mut self, partitions: &[TopicPartition]) -> Result<(), KafkaError>;
    fn resume(&mut self, partitions: &[TopicPartition]) -> Result<(), KafkaError>;
}

/// The synchronous Kafka consumer surface the driver coordinates.
///
/// Implementations are not thread-safe; the driver is their sole owner and
/// calls every method from its mailbox thread. `poll` is the single combined
/// operation that fetches records, runs rebalance callbacks on the installed
/// listener, and fires pending commit callbacks.
pub trait DriverClient: PartitionControl {
    /// Replaces the manual assignment with exactly `partitions`. Union
    /// semantics live in the driver, not here.
    fn assign(&mut self, partitions: &[TopicPartition]) -> Result<(), KafkaError>;

    /// Moves the fetch position of an assigned partition.
    fn seek(&mut self, partition: &TopicPartition, offset: i64) -> Result<(), KafkaError>;

    /// Replaces the subscription with `topics` and installs `listener` for
    /// rebalance callbacks.
    fn subscribe(
        &mut self,
        topics: &[String],
        listener: Box<dyn RebalanceListener>,
    ) -> Result<(), KafkaError>;

    /// Like [`DriverClient::subscribe`], matching topics against a pattern.
    fn subscribe_pattern(
        &mut self,
        pattern: &Regex,
        listener: Box<dyn RebalanceListener>,
    ) -> Result<(), KafkaError>;

    /// The partitions currently assigned to this client, whether manually or
    /// through the consumer group.
    fn assignment(&self) -> Result<Vec<TopicPartition>, KafkaError>;

    /// Blocks for up to `timeout` and returns whatever records are ready on
    /// resumed partitions. Rebalance and commit callbacks fire from inside
    /// this call, on the calling thread.
    fn poll(&mut self, timeout: Duration) -> Result<RecordBatch, KafkaError>;

    /// Issues a non-blocking commit. `callback` runs inside a later `poll`
    /// once the broker has answered.
    fn commit_async(
        &mut self,
        offsets: HashMap<TopicPartition, OffsetAndMetadata>,
        callback: CommitCallback,
    ) -> Result<(), KafkaError>;

    /// Releases the client. Called exactly once, after the mailbox loop has
    /// exited.
    fn close(&mut self);
}
