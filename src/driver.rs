use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use regex::Regex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::client::{CommitCallback, DriverClient};
use crate::commands::{CommitReply, DriverCommand, MessageSink, Messages, Requester};
use crate::config::DriverSettings;
use crate::error::DriverError;
use crate::metrics_consts::{
    DRIVER_COMMITS_IN_FLIGHT, DRIVER_COMMIT_FAILURES, DRIVER_PENDING_REQUESTS, DRIVER_POLLS,
    DRIVER_RECORDS_DISPATCHED, DRIVER_REJECTED_WHILE_STOPPING,
};
use crate::rebalance::{AutoPauseListener, RebalanceListener};
use crate::types::{ConsumerRecord, OffsetAndMetadata, RecordBatch, RequesterId, TopicPartition};

/// How many short polls to run after detecting an in-flight commit before
/// yielding the mailbox back to other commands.
const COMMIT_DRIVE_ATTEMPTS: usize = 10;
const COMMIT_DRIVE_PAUSE: Duration = Duration::from_micros(10);
const COMMIT_DRIVE_FINAL_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, PartialEq, Eq)]
enum Step {
    Continue,
    Terminate,
}

/// Coordinator owning one Kafka consumer client.
///
/// The driver serializes every operation on the client through its mailbox:
/// one command is processed at a time, to completion, on the thread running
/// [`ConsumerDriver::run`]. No other thread may touch the client. Downstream
/// stages interact exclusively through [`DriverCommand`]s, normally via
/// [`crate::handle::DriverHandle`].
pub struct ConsumerDriver<C: DriverClient> {
    client: C,
    settings: DriverSettings,
    commands: mpsc::UnboundedReceiver<DriverCommand>,
    /// Pending one-shot demand, one requester per partition. Cleared per
    /// partition as soon as records for it are dispatched.
    requests: HashMap<TopicPartition, Requester>,
    /// Commits issued minus commit callbacks fired. Shared with the
    /// callbacks, which the client runs on this thread from inside `poll`.
    commits_in_flight: Arc<AtomicUsize>,
    stop_in_progress: bool,
}

impl<C: DriverClient> ConsumerDriver<C> {
    pub fn new(
        client: C,
        settings: DriverSettings,
        commands: mpsc::UnboundedReceiver<DriverCommand>,
    ) -> Self {
        Self {
            client,
            settings,
            commands,
            requests: HashMap::new(),
            commits_in_flight: Arc::new(AtomicUsize::new(0)),
            stop_in_progress: false,
        }
    }

    /// Runs the mailbox loop until the driver terminates, then closes the
    /// client. An `Err` means the driver died on a client failure or a broken
    /// invariant; restarting is the caller's decision.
    pub fn run(mut self) -> Result<(), DriverError> {
        info!("consumer driver started");
        let result = self.run_loop();
        self.client.close();
        match &result {
            Ok(()) => info!("consumer driver stopped"),
            Err(e) => error!("consumer driver terminated: {e}"),
        }
        result
    }

    fn run_loop(&mut self) -> Result<(), DriverError> {
        while let Some(command) = self.commands.blocking_recv() {
            match self.handle_command(command)? {
                Step::Continue => {}
                Step::Terminate => return Ok(()),
            }
        }
        // Every handle has been dropped; nothing can reach the mailbox
        // anymore, so treat this like a stop with nothing to drain.
        info!("driver mailbox closed, shutting down");
        Ok(())
    }

    fn handle_command(&mut self, command: DriverCommand) -> Result<Step, DriverError> {
        match command {
            DriverCommand::Assign(partitions) => {
                if self.reject_while_stopping("Assign") {
                    return Ok(Step::Continue);
                }
                self.assign(&partitions)?;
                Ok(Step::Continue)
            }
            DriverCommand::AssignWithOffsets(offsets) => {
                if self.reject_while_stopping("AssignWithOffsets") {
                    return Ok(Step::Continue);
                }
                self.assign_with_offsets(&offsets)?;
                Ok(Step::Continue)
            }
            DriverCommand::Subscribe { topics, listener } => {
                if self.reject_while_stopping("Subscribe") {
                    return Ok(Step::Continue);
                }
                self.subscribe(&topics, listener)?;
                Ok(Step::Continue)
            }
            DriverCommand::SubscribePattern { pattern, listener } => {
                if self.reject_while_stopping("SubscribePattern") {
                    return Ok(Step::Continue);
                }
                self.subscribe_pattern(&pattern, listener)?;
                Ok(Step::Continue)
            }
            DriverCommand::RequestMessages {
                requester,
                partitions,
            } => self.request_messages(requester, partitions),
            DriverCommand::Commit { offsets, reply } => self.commit(offsets, reply),
            DriverCommand::RequesterGone(id) => {
                self.purge_requester(id);
                Ok(Step::Continue)
            }
            DriverCommand::Poll => self.poll_cycle(),
            DriverCommand::Stop => {
                if self.stop_in_progress {
                    return Ok(Step::Continue);
                }
                if self.pending_commits() == 0 {
                    info!("stop requested with no commits in flight, terminating");
                    Ok(Step::Terminate)
                } else {
                    info!(
                        "stop requested, draining {} in-flight commits",
                        self.pending_commits()
                    );
                    self.stop_in_progress = true;
                    Ok(Step::Continue)
                }
            }
        }
    }

    /// Extends the client assignment with `partitions`. Assignment is
    /// additive: already-assigned partitions keep their position, new ones
    /// start at the broker default.
    fn assign(&mut self, partitions: &HashSet<TopicPartition>) -> Result<(), DriverError> {
        let mut union: HashSet<TopicPartition> = self
            .client
            .assignment()
            .map_err(DriverError::Client)?
            .into_iter()
            .collect();
        union.extend(partitions.iter().cloned());
        let union: Vec<TopicPartition> = union.into_iter().collect();
        debug!("assigning {} partitions", union.len());
        self.client.assign(&union).map_err(DriverError::Client)?;
        // Newly assigned partitions have no demand yet and must not fetch.
        self.reconcile_pause_state()
    }

    fn assign_with_offsets(
        &mut self,
        offsets: &HashMap<TopicPartition, i64>,
    ) -> Result<(), DriverError> {
        let partitions: HashSet<TopicPartition> = offsets.keys().cloned().collect();
        self.assign(&partitions)?;
        for (partition, offset) in offsets {
            debug!("seeking {partition} to offset {offset}");
            self.client
                .seek(partition, *offset)
                .map_err(DriverError::Client)?;
        }
        Ok(())
    }

    fn subscribe(
        &mut self,
        topics: &[String],
        listener: Box<dyn RebalanceListener>,
    ) -> Result<(), DriverError> {
        info!("subscribing to topics {topics:?}");
        let listener = Box::new(AutoPauseListener::new(listener));
        self.client
            .subscribe(topics, listener)
            .map_err(DriverError::Client)
    }

    fn subscribe_pattern(
        &mut self,
        pattern: &Regex,
        listener: Box<dyn RebalanceListener>,
    ) -> Result<(), DriverError> {
        info!("subscribing to topic pattern {}", pattern.as_str());
        let listener = Box::new(AutoPauseListener::new(listener));
        self.client
            .subscribe_pattern(pattern, listener)
            .map_err(DriverError::Client)
    }

    fn request_messages(
        &mut self,
        requester: Requester,
        partitions: HashSet<TopicPartition>,
    ) -> Result<Step, DriverError> {
        if self.stop_in_progress {
            metrics::counter!(DRIVER_REJECTED_WHILE_STOPPING).increment(1);
            let _ = requester.sink.send(Err(DriverError::Stopping));
            return Ok(Step::Continue);
        }
        debug!(
            "recording demand from {} for {} partitions",
            requester.id,
            partitions.len()
        );
        for partition in partitions {
            // Latest requester wins if the partition was already demanded.
            self.requests.insert(partition, requester.clone());
        }
        metrics::gauge!(DRIVER_PENDING_REQUESTS).set(self.requests.len() as f64);
        self.poll_cycle()
    }

    fn commit(
        &mut self,
        offsets: HashMap<TopicPartition, i64>,
        reply: CommitReply,
    ) -> Result<Step, DriverError> {
        if self.stop_in_progress {
            metrics::counter!(DRIVER_REJECTED_WHILE_STOPPING).increment(1);
            let _ = reply.send(Err(DriverError::Stopping));
            return Ok(Step::Continue);
        }

        let offsets: HashMap<TopicPartition, OffsetAndMetadata> = offsets
            .into_iter()
            .map(|(partition, offset)| (partition, OffsetAndMetadata::new(offset)))
            .collect();

        self.commits_in_flight.fetch_add(1, Ordering::SeqCst);
        metrics::gauge!(DRIVER_COMMITS_IN_FLIGHT).set(self.pending_commits() as f64);

        let counter = Arc::clone(&self.commits_in_flight);
        let callback: CommitCallback = Box::new(move |outcome| {
            let remaining = counter.fetch_sub(1, Ordering::SeqCst) - 1;
            metrics::gauge!(DRIVER_COMMITS_IN_FLIGHT).set(remaining as f64);
            let reply_value = match outcome {
                Ok(committed) => Ok(committed),
                Err(e) => {
                    metrics::counter!(DRIVER_COMMIT_FAILURES).increment(1);
                    Err(DriverError::Commit(e))
                }
            };
            // The committer may have gone away; that is its problem.
            let _ = reply.send(reply_value);
        });

        if let Err(e) = self.client.commit_async(offsets, callback) {
            // The callback will never fire for a commit that was not issued.
            self.commits_in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(DriverError::Client(e));
        }

        // Poll right away so the commit callback can start landing.
        self.poll_cycle()
    }

    /// One pause/resume/poll/dispatch cycle. Runs on every tick, after every
    /// request, and after every issued commit.
    fn poll_cycle(&mut self) -> Result<Step, DriverError> {
        metrics::counter!(DRIVER_POLLS).increment(1);
        self.reconcile_pause_state()?;

        if self.requests.is_empty() {
            self.drive_commits()?;
        } else {
            let batch = self
                .client
                .poll(self.settings.poll_timeout)
                .map_err(DriverError::Client)?;
            if !batch.is_empty() {
                self.dispatch(batch)?;
            }
        }

        if self.stop_in_progress && self.pending_commits() == 0 {
            info!("in-flight commits drained, terminating");
            return Ok(Step::Terminate);
        }
        Ok(Step::Continue)
    }

    /// Applies the authoritative pause state: an assigned partition is
    /// resumed iff a request is pending for it.
    fn reconcile_pause_state(&mut self) -> Result<(), DriverError> {
        let assignment = self.client.assignment().map_err(DriverError::Client)?;
        let (resume, pause): (Vec<TopicPartition>, Vec<TopicPartition>) = assignment
            .into_iter()
            .partition(|partition| self.requests.contains_key(partition));
        if !pause.is_empty() {
            self.client.pause(&pause).map_err(DriverError::Client)?;
        }
        if !resume.is_empty() {
            self.client.resume(&resume).map_err(DriverError::Client)?;
        }
        Ok(())
    }

    /// With no demand the client must still be driven so commit callbacks
    /// fire. Every partition is paused here, so any record is a bug. The
    /// bounded loop keeps the mailbox responsive; leftover commits complete
    /// on the next tick.
    fn drive_commits(&mut self) -> Result<(), DriverError> {
        self.poll_expecting_nothing(Duration::ZERO)?;
        if self.pending_commits() == 0 {
            return Ok(());
        }
        for _ in 0..COMMIT_DRIVE_ATTEMPTS {
            thread::sleep(COMMIT_DRIVE_PAUSE);
            self.poll_expecting_nothing(Duration::ZERO)?;
            if self.pending_commits() == 0 {
                return Ok(());
            }
        }
        // Last resort before yielding the mailbox.
        self.poll_expecting_nothing(COMMIT_DRIVE_FINAL_POLL)
    }

    fn poll_expecting_nothing(&mut self, timeout: Duration) -> Result<(), DriverError> {
        let batch = self.client.poll(timeout).map_err(DriverError::Client)?;
        if batch.is_empty() {
            Ok(())
        } else {
            Err(DriverError::InvariantViolation(format!(
                "poll returned {} records while no partition was requested",
                batch.len()
            )))
        }
    }

    /// Routes one poll result back to the requesters and consumes the demand
    /// of every partition that produced records.
    fn dispatch(&mut self, mut batch: RecordBatch) -> Result<(), DriverError> {
        for partition in batch.partitions() {
            if !self.requests.contains_key(partition) {
                return Err(DriverError::InvariantViolation(format!(
                    "poll returned records for unrequested partition {partition}"
                )));
            }
        }

        let mut deliveries: HashMap<RequesterId, (MessageSink, Vec<ConsumerRecord>)> =
            HashMap::new();
        let mut delivered: Vec<TopicPartition> = Vec::new();
        for (partition, requester) in &self.requests {
            if let Some(records) = batch.take(partition) {
                delivered.push(partition.clone());
                let entry = deliveries
                    .entry(requester.id)
                    .or_insert_with(|| (requester.sink.clone(), Vec::new()));
                entry.1.extend(records);
            }
        }

        let mut gone: Vec<RequesterId> = Vec::new();
        for (id, (sink, records)) in deliveries {
            metrics::counter!(DRIVER_RECORDS_DISPATCHED).increment(records.len() as u64);
            debug!("delivering {} records to {id}", records.len());
            if sink.send(Ok(Messages { records })).is_err() {
                warn!("{id} mailbox closed, dropping its pending requests");
                gone.push(id);
            }
        }

        for partition in delivered {
            self.requests.remove(&partition);
        }
        for id in gone {
            self.purge_requester(id);
        }
        metrics::gauge!(DRIVER_PENDING_REQUESTS).set(self.requests.len() as f64);
        Ok(())
    }

    fn purge_requester(&mut self, id: RequesterId) {
        let before = self.requests.len();
        self.requests.retain(|_, requester| requester.id != id);
        if self.requests.len() != before {
            debug!(
                "purged {} pending requests of departed {id}",
                before - self.requests.len()
            );
        }
        metrics::gauge!(DRIVER_PENDING_REQUESTS).set(self.requests.len() as f64);
    }

    fn pending_commits(&self) -> usize {
        self.commits_in_flight.load(Ordering::SeqCst)
    }

    fn reject_while_stopping(&self, command: &str) -> bool {
        if self.stop_in_progress {
            warn!("dropping {command} received while stopping");
        }
        self.stop_in_progress
    }
}
