use std::collections::{HashMap, HashSet};

use regex::Regex;
use tokio::sync::{mpsc, oneshot};

use crate::error::DriverError;
use crate::rebalance::RebalanceListener;
use crate::types::{ConsumerRecord, OffsetAndMetadata, RequesterId, TopicPartition};

/// One batch of records delivered to a requester. A requester receives at
/// most one `Messages` per poll cycle, carrying the records of all its
/// requested partitions that produced data; per-partition broker order is
/// preserved.
#[derive(Debug)]
pub struct Messages {
    pub records: Vec<ConsumerRecord>,
}

/// Where fetched records (or a stopping failure) for a requester are
/// delivered. The driver treats a closed sink as the requester having died
/// and purges its pending requests.
pub type MessageSink = mpsc::UnboundedSender<Result<Messages, DriverError>>;

/// Reply channel for [`DriverCommand::Commit`]: the committed offsets on
/// success, the broker error or a stopping failure otherwise.
pub type CommitReply =
    oneshot::Sender<Result<HashMap<TopicPartition, OffsetAndMetadata>, DriverError>>;

/// A downstream consumer awaiting records.
#[derive(Clone)]
pub struct Requester {
    pub id: RequesterId,
    pub sink: MessageSink,
}

/// Inbound message surface of the driver mailbox.
pub enum DriverCommand {
    /// Extend the manual assignment with these partitions (additive union).
    Assign(HashSet<TopicPartition>),
    /// Extend the assignment, then seek each partition to the given offset.
    AssignWithOffsets(HashMap<TopicPartition, i64>),
    /// Replace the subscription with a topic list.
    Subscribe {
        topics: Vec<String>,
        listener: Box<dyn RebalanceListener>,
    },
    /// Replace the subscription with a topic pattern.
    SubscribePattern {
        pattern: Regex,
        listener: Box<dyn RebalanceListener>,
    },
    /// One-shot demand: fetch records for these partitions and deliver them
    /// to the requester's sink. Delivery consumes the demand per partition.
    RequestMessages {
        requester: Requester,
        partitions: HashSet<TopicPartition>,
    },
    /// Commit these offsets asynchronously and reply once the broker
    /// acknowledges.
    Commit {
        offsets: HashMap<TopicPartition, i64>,
        reply: CommitReply,
    },
    /// A requester died; drop its pending requests.
    RequesterGone(RequesterId),
    /// Internal tick from the poll ticker.
    Poll,
    /// Stop accepting work and terminate once in-flight commits have drained.
    Stop,
}
