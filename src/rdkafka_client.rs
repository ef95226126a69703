use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::BorrowedMessage;
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::{ClientContext, Message, Offset};
use regex::Regex;
use tracing::{debug, warn};

use crate::client::{CommitCallback, DriverClient, PartitionControl};
use crate::rebalance::RebalanceListener;
use crate::types::{ConsumerRecord, OffsetAndMetadata, RecordBatch, TopicPartition};

/// Upper bound on how long an assign-time seek may block the driver thread.
const SEEK_TIMEOUT: Duration = Duration::from_secs(10);

/// State the librdkafka callbacks reach back into. Callbacks fire inside
/// `poll` on the driver thread; the mutexes are uncontended and only satisfy
/// the `Send + Sync` bounds of the client context.
struct CallbackState {
    listener: Mutex<Option<Box<dyn RebalanceListener>>>,
    pending_commits: Mutex<VecDeque<CommitCallback>>,
}

/// Consumer context routing librdkafka rebalance and commit callbacks to the
/// driver's listener and commit bookkeeping.
pub struct DriverContext {
    state: Arc<CallbackState>,
}

impl ClientContext for DriverContext {}

impl ConsumerContext for DriverContext {
    fn pre_rebalance(&self, consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(partitions) => {
                let partitions = from_tpl(partitions);
                debug!("revoking {} partitions", partitions.len());
                let mut listener = self.state.listener.lock().unwrap();
                if let Some(listener) = listener.as_mut() {
                    let mut control = ConsumerPartitionControl { consumer };
                    listener.on_partitions_revoked(&mut control, &partitions);
                }
            }
            Rebalance::Assign(_) => {}
            Rebalance::Error(e) => warn!("rebalance error: {e}"),
        }
    }

    fn post_rebalance(&self, consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        if let Rebalance::Assign(partitions) = rebalance {
            let partitions = from_tpl(partitions);
            debug!("assigned {} partitions", partitions.len());
            let mut listener = self.state.listener.lock().unwrap();
            if let Some(listener) = listener.as_mut() {
                let mut control = ConsumerPartitionControl { consumer };
                listener.on_partitions_assigned(&mut control, &partitions);
            }
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        let Some(callback) = self.state.pending_commits.lock().unwrap().pop_front() else {
            warn!("commit callback fired with no pending commit");
            return;
        };
        callback(result.map(|()| offsets_from_tpl(offsets)));
    }
}

/// Pause/resume view over the consumer for listeners running inside a
/// rebalance callback.
struct ConsumerPartitionControl<'a> {
    consumer: &'a BaseConsumer<DriverContext>,
}

impl PartitionControl for ConsumerPartitionControl<'_> {
    fn pause(&mut self, partitions: &[TopicPartition]) -> Result<(), KafkaError> {
        self.consumer.pause(&to_tpl(partitions))
    }

    fn resume(&mut self, partitions: &[TopicPartition]) -> Result<(), KafkaError> {
        self.consumer.resume(&to_tpl(partitions))
    }
}

/// [`DriverClient`] backed by a librdkafka `BaseConsumer`.
///
/// The synchronous consumer matches the driver's poll discipline: records,
/// rebalance callbacks and commit callbacks all surface through `poll` on
/// the calling thread. librdkafka reports async commit completions through
/// the context callback in submission order, so pending driver callbacks are
/// queued FIFO and matched in order.
pub struct RdkafkaDriverClient {
    consumer: BaseConsumer<DriverContext>,
    state: Arc<CallbackState>,
}

impl RdkafkaDriverClient {
    /// Builds the consumer from an rdkafka properties bag. The bag must name
    /// at least the bootstrap servers and group id; see
    /// [`crate::config::ConsumerConfigBuilder`].
    pub fn from_config(config: &ClientConfig) -> Result<Self, KafkaError> {
        let state = Arc::new(CallbackState {
            listener: Mutex::new(None),
            pending_commits: Mutex::new(VecDeque::new()),
        });
        let context = DriverContext {
            state: Arc::clone(&state),
        };
        let consumer: BaseConsumer<DriverContext> = config.create_with_context(context)?;
        Ok(Self { consumer, state })
    }
}

impl PartitionControl for RdkafkaDriverClient {
    fn pause(&mut self, partitions: &[TopicPartition]) -> Result<(), KafkaError> {
        self.consumer.pause(&to_tpl(partitions))
    }

    fn resume(&mut self, partitions: &[TopicPartition]) -> Result<(), KafkaError> {
        self.consumer.resume(&to_tpl(partitions))
    }
}

impl DriverClient for RdkafkaDriverClient {
    fn assign(&mut self, partitions: &[TopicPartition]) -> Result<(), KafkaError> {
        self.consumer.assign(&to_tpl(partitions))
    }

    fn seek(&mut self, partition: &TopicPartition, offset: i64) -> Result<(), KafkaError> {
        self.consumer.seek(
            partition.topic(),
            partition.partition(),
            Offset::Offset(offset),
            SEEK_TIMEOUT,
        )
    }

    fn subscribe(
        &mut self,
        topics: &[String],
        listener: Box<dyn RebalanceListener>,
    ) -> Result<(), KafkaError> {
        *self.state.listener.lock().unwrap() = Some(listener);
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topics)
    }

    fn subscribe_pattern(
        &mut self,
        pattern: &Regex,
        listener: Box<dyn RebalanceListener>,
    ) -> Result<(), KafkaError> {
        *self.state.listener.lock().unwrap() = Some(listener);
        // librdkafka treats topics starting with '^' as regex subscriptions.
        let raw = pattern.as_str();
        let topic = if raw.starts_with('^') {
            raw.to_string()
        } else {
            format!("^{raw}")
        };
        self.consumer.subscribe(&[&topic])
    }

    fn assignment(&self) -> Result<Vec<TopicPartition>, KafkaError> {
        Ok(from_tpl(&self.consumer.assignment()?))
    }

    fn poll(&mut self, timeout: Duration) -> Result<RecordBatch, KafkaError> {
        let mut batch = RecordBatch::default();
        match self.consumer.poll(timeout) {
            None => return Ok(batch),
            Some(first) => {
                let message = first?;
                batch.push(record_from(&message));
            }
        }
        // Drain whatever librdkafka already has buffered without blocking
        // again.
        while let Some(next) = self.consumer.poll(Duration::ZERO) {
            let message = next?;
            batch.push(record_from(&message));
        }
        Ok(batch)
    }

    fn commit_async(
        &mut self,
        offsets: HashMap<TopicPartition, OffsetAndMetadata>,
        callback: CommitCallback,
    ) -> Result<(), KafkaError> {
        let mut tpl = TopicPartitionList::new();
        for (partition, entry) in &offsets {
            tpl.add_partition_offset(
                partition.topic(),
                partition.partition(),
                Offset::Offset(entry.offset),
            )?;
        }
        // Queue before issuing so the callback can never fire unmatched.
        self.state.pending_commits.lock().unwrap().push_back(callback);
        if let Err(e) = self.consumer.commit(&tpl, CommitMode::Async) {
            self.state.pending_commits.lock().unwrap().pop_back();
            return Err(e);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.consumer.unsubscribe();
        debug!("kafka consumer closed");
    }
}

fn to_tpl(partitions: &[TopicPartition]) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::new();
    for partition in partitions {
        tpl.add_partition(partition.topic(), partition.partition());
    }
    tpl
}

fn from_tpl(tpl: &TopicPartitionList) -> Vec<TopicPartition> {
    tpl.elements()
        .iter()
        .map(|elem| TopicPartition::new(elem.topic().to_string(), elem.partition()))
        .collect()
}

fn offsets_from_tpl(tpl: &TopicPartitionList) -> HashMap<TopicPartition, OffsetAndMetadata> {
    tpl.elements()
        .iter()
        .filter_map(|elem| match elem.offset() {
            Offset::Offset(offset) => Some((
                TopicPartition::new(elem.topic().to_string(), elem.partition()),
                OffsetAndMetadata::new(offset),
            )),
            _ => None,
        })
        .collect()
}

fn record_from(message: &BorrowedMessage<'_>) -> ConsumerRecord {
    ConsumerRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec),
        timestamp_ms: message.timestamp().to_millis(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tpl_round_trip_preserves_partitions() {
        let partitions = vec![
            TopicPartition::new("events", 0),
            TopicPartition::new("events", 1),
            TopicPartition::new("clicks", 3),
        ];
        let mut round_tripped = from_tpl(&to_tpl(&partitions));
        round_tripped.sort();
        let mut expected = partitions;
        expected.sort();
        assert_eq!(round_tripped, expected);
    }

    #[test]
    fn committed_offsets_are_extracted_from_the_result_list() {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset("events", 0, Offset::Offset(42))
            .unwrap();
        tpl.add_partition("pending", 1);

        let offsets = offsets_from_tpl(&tpl);
        assert_eq!(
            offsets.get(&TopicPartition::new("events", 0)),
            Some(&OffsetAndMetadata::new(42))
        );
        // Entries without a concrete offset are not reported as committed.
        assert!(!offsets.contains_key(&TopicPartition::new("pending", 1)));
    }
}
