//! Scripted stub client for driver tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rdkafka::error::KafkaError;
use regex::Regex;

use crate::client::{CommitCallback, DriverClient, PartitionControl};
use crate::rebalance::RebalanceListener;
use crate::types::{ConsumerRecord, OffsetAndMetadata, RecordBatch, TopicPartition};

pub fn tp(topic: &str, partition: i32) -> TopicPartition {
    TopicPartition::new(topic, partition)
}

pub fn record(topic: &str, partition: i32, offset: i64) -> ConsumerRecord {
    ConsumerRecord {
        topic: topic.to_string(),
        partition,
        offset,
        key: None,
        payload: Some(format!("payload-{offset}").into_bytes()),
        timestamp_ms: None,
    }
}

#[derive(Default)]
struct StubState {
    assignment: Vec<TopicPartition>,
    paused: HashSet<TopicPartition>,
    seeks: Vec<(TopicPartition, i64)>,
    topics: Vec<String>,
    pattern: Option<String>,
    listener: Option<Box<dyn RebalanceListener>>,
    poll_results: VecDeque<RecordBatch>,
    pending_commits: VecDeque<(HashMap<TopicPartition, OffsetAndMetadata>, CommitCallback)>,
    commit_outcomes: VecDeque<Result<(), KafkaError>>,
    hold_commits: bool,
    pending_rebalance_assigns: VecDeque<Vec<TopicPartition>>,
    fail_next_poll: Option<KafkaError>,
    polls: Vec<Duration>,
    events: Vec<String>,
    close_count: usize,
}

/// In-memory `DriverClient` driven entirely by its [`StubProbe`].
///
/// The stub mimics the two callback guarantees of the real client: rebalance
/// listeners and commit callbacks both fire from inside `poll`, on the
/// calling thread.
pub struct StubClient {
    state: Arc<Mutex<StubState>>,
}

/// Test-side view of a [`StubClient`]: scripts its behavior and inspects the
/// calls the driver made.
#[derive(Clone)]
pub struct StubProbe {
    state: Arc<Mutex<StubState>>,
}

pub fn stub_client() -> (StubClient, StubProbe) {
    let state = Arc::new(Mutex::new(StubState::default()));
    (
        StubClient {
            state: Arc::clone(&state),
        },
        StubProbe { state },
    )
}

impl StubProbe {
    /// Queues a batch to be returned by the next `poll`.
    pub fn enqueue_poll(&self, records: Vec<ConsumerRecord>) {
        let batch: RecordBatch = records.into_iter().collect();
        self.state.lock().unwrap().poll_results.push_back(batch);
    }

    /// Keeps issued commits pending instead of completing them on the next
    /// poll.
    pub fn hold_commits(&self) {
        self.state.lock().unwrap().hold_commits = true;
    }

    pub fn release_commits(&self) {
        self.state.lock().unwrap().hold_commits = false;
    }

    /// Scripts the outcome of the next completed commit (default: success).
    pub fn enqueue_commit_outcome(&self, outcome: Result<(), KafkaError>) {
        self.state.lock().unwrap().commit_outcomes.push_back(outcome);
    }

    /// Scripts a group rebalance assigning `partitions` during the next
    /// `poll`.
    pub fn enqueue_rebalance_assign(&self, partitions: Vec<TopicPartition>) {
        self.state
            .lock()
            .unwrap()
            .pending_rebalance_assigns
            .push_back(partitions);
    }

    pub fn fail_next_poll(&self, error: KafkaError) {
        self.state.lock().unwrap().fail_next_poll = Some(error);
    }

    pub fn assignment(&self) -> Vec<TopicPartition> {
        self.state.lock().unwrap().assignment.clone()
    }

    pub fn paused(&self) -> HashSet<TopicPartition> {
        self.state.lock().unwrap().paused.clone()
    }

    pub fn seeks(&self) -> Vec<(TopicPartition, i64)> {
        self.state.lock().unwrap().seeks.clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.state.lock().unwrap().topics.clone()
    }

    pub fn pattern(&self) -> Option<String> {
        self.state.lock().unwrap().pattern.clone()
    }

    /// Timeouts of every `poll` the driver issued, in order.
    pub fn polls(&self) -> Vec<Duration> {
        self.state.lock().unwrap().polls.clone()
    }

    /// Ordered journal of pause/resume/assign/seek calls plus anything the
    /// test pushed via [`StubProbe::push_event`].
    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn push_event(&self, event: &str) {
        self.state.lock().unwrap().events.push(event.to_string());
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().close_count
    }

    pub fn pending_commit_count(&self) -> usize {
        self.state.lock().unwrap().pending_commits.len()
    }
}

impl PartitionControl for StubClient {
    fn pause(&mut self, partitions: &[TopicPartition]) -> Result<(), KafkaError> {
        let mut state = self.state.lock().unwrap();
        for partition in partitions {
            state.events.push(format!("pause:{partition}"));
            state.paused.insert(partition.clone());
        }
        Ok(())
    }

    fn resume(&mut self, partitions: &[TopicPartition]) -> Result<(), KafkaError> {
        let mut state = self.state.lock().unwrap();
        for partition in partitions {
            state.events.push(format!("resume:{partition}"));
            state.paused.remove(partition);
        }
        Ok(())
    }
}

impl DriverClient for StubClient {
    fn assign(&mut self, partitions: &[TopicPartition]) -> Result<(), KafkaError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("assign:{}", partitions.len()));
        state.assignment = partitions.to_vec();
        state.assignment.sort();
        Ok(())
    }

    fn seek(&mut self, partition: &TopicPartition, offset: i64) -> Result<(), KafkaError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("seek:{partition}@{offset}"));
        state.seeks.push((partition.clone(), offset));
        Ok(())
    }

    fn subscribe(
        &mut self,
        topics: &[String],
        listener: Box<dyn RebalanceListener>,
    ) -> Result<(), KafkaError> {
        let mut state = self.state.lock().unwrap();
        state.topics = topics.to_vec();
        state.listener = Some(listener);
        Ok(())
    }

    fn subscribe_pattern(
        &mut self,
        pattern: &Regex,
        listener: Box<dyn RebalanceListener>,
    ) -> Result<(), KafkaError> {
        let mut state = self.state.lock().unwrap();
        state.pattern = Some(pattern.as_str().to_string());
        state.listener = Some(listener);
        Ok(())
    }

    fn assignment(&self) -> Result<Vec<TopicPartition>, KafkaError> {
        Ok(self.state.lock().unwrap().assignment.clone())
    }

    fn poll(&mut self, timeout: Duration) -> Result<RecordBatch, KafkaError> {
        {
            let mut state = self.state.lock().unwrap();
            state.polls.push(timeout);
            if let Some(error) = state.fail_next_poll.take() {
                return Err(error);
            }
        }

        // Rebalance callbacks fire from inside poll, like the real client.
        // The listener is taken out while it runs so it can call back into
        // the pause/resume surface without deadlocking.
        loop {
            let (assigned, mut listener) = {
                let mut state = self.state.lock().unwrap();
                let Some(assigned) = state.pending_rebalance_assigns.pop_front() else {
                    break;
                };
                for partition in &assigned {
                    if !state.assignment.contains(partition) {
                        state.assignment.push(partition.clone());
                    }
                }
                state.assignment.sort();
                (assigned, state.listener.take())
            };
            if let Some(listener) = listener.as_mut() {
                listener.on_partitions_assigned(self, &assigned);
            }
            self.state.lock().unwrap().listener = listener;
        }

        // Commit callbacks also land inside poll.
        loop {
            let completed = {
                let mut state = self.state.lock().unwrap();
                if state.hold_commits {
                    None
                } else if let Some((offsets, callback)) = state.pending_commits.pop_front() {
                    let outcome = state.commit_outcomes.pop_front().unwrap_or(Ok(()));
                    Some((offsets, callback, outcome))
                } else {
                    None
                }
            };
            let Some((offsets, callback, outcome)) = completed else {
                break;
            };
            callback(outcome.map(|()| offsets));
        }

        let batch = self
            .state
            .lock()
            .unwrap()
            .poll_results
            .pop_front()
            .unwrap_or_default();
        Ok(batch)
    }

    fn commit_async(
        &mut self,
        offsets: HashMap<TopicPartition, OffsetAndMetadata>,
        callback: CommitCallback,
    ) -> Result<(), KafkaError> {
        self.state
            .lock()
            .unwrap()
            .pending_commits
            .push_back((offsets, callback));
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().close_count += 1;
    }
}
