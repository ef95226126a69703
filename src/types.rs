use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A Kafka topic shard identified by topic name and partition index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    topic: String,
    partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// An offset to commit for one partition, with the (usually empty) metadata
/// string the broker stores alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetAndMetadata {
    pub offset: i64,
    pub metadata: String,
}

impl OffsetAndMetadata {
    pub fn new(offset: i64) -> Self {
        Self {
            offset,
            metadata: String::new(),
        }
    }
}

/// One record fetched from the broker, detached from any client buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub timestamp_ms: Option<i64>,
}

impl ConsumerRecord {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

/// The output of one `poll`, grouped per partition. Within a partition the
/// records keep broker order; across partitions there is no order.
#[derive(Debug, Default)]
pub struct RecordBatch {
    records: HashMap<TopicPartition, Vec<ConsumerRecord>>,
}

impl RecordBatch {
    pub fn push(&mut self, record: ConsumerRecord) {
        self.records
            .entry(record.topic_partition())
            .or_default()
            .push(record);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn partitions(&self) -> impl Iterator<Item = &TopicPartition> {
        self.records.keys()
    }

    /// Removes and returns the records fetched for `partition`, if any.
    pub fn take(&mut self, partition: &TopicPartition) -> Option<Vec<ConsumerRecord>> {
        self.records.remove(partition)
    }
}

impl FromIterator<ConsumerRecord> for RecordBatch {
    fn from_iter<I: IntoIterator<Item = ConsumerRecord>>(iter: I) -> Self {
        let mut batch = RecordBatch::default();
        for record in iter {
            batch.push(record);
        }
        batch
    }
}

/// Identity of a downstream requester, used to group deliveries and to purge
/// the request registry when a requester goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequesterId(u64);

impl RequesterId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "requester-{}", self.0)
    }
}
