use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Context, Result};
use rdkafka::error::KafkaError;
use regex::Regex;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::client::DriverClient;
use crate::commands::{DriverCommand, MessageSink, Requester};
use crate::config::DriverSettings;
use crate::driver::ConsumerDriver;
use crate::error::DriverError;
use crate::rebalance::RebalanceListener;
use crate::types::{OffsetAndMetadata, RequesterId, TopicPartition};

/// Cloneable mailbox address of a running consumer driver.
///
/// [`DriverHandle::spawn`] starts the driver on a dedicated OS thread: the
/// client factory runs there because the client is not thread-safe, and
/// `poll` may block that thread for up to the configured poll timeout. A
/// Tokio runtime must be current when spawning; the poll ticker lives on it.
///
/// The ticker holds only a weak mailbox sender, so dropping every handle
/// shuts the driver down as if `stop` had been called with nothing to drain.
#[derive(Clone)]
pub struct DriverHandle {
    commands: mpsc::UnboundedSender<DriverCommand>,
    driver_thread: Arc<Mutex<Option<thread::JoinHandle<Result<(), DriverError>>>>>,
}

impl DriverHandle {
    pub fn spawn<C, F>(settings: DriverSettings, create_client: F) -> Result<Self>
    where
        C: DriverClient + 'static,
        F: FnOnce() -> Result<C, KafkaError> + Send + 'static,
    {
        let (commands, mailbox) = mpsc::unbounded_channel();

        // Poll ticker: keeps commit and rebalance callbacks progressing even
        // when no downstream is requesting records.
        let ticker_commands = commands.downgrade();
        let poll_interval = settings.poll_interval;
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + poll_interval;
            let mut ticker = tokio::time::interval_at(start, poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(commands) = ticker_commands.upgrade() else {
                    break;
                };
                if commands.send(DriverCommand::Poll).is_err() {
                    break;
                }
            }
            debug!("poll ticker stopped");
        });

        let driver_thread = thread::Builder::new()
            .name("kafka-consumer-driver".to_string())
            .spawn(move || {
                let client = create_client().map_err(DriverError::Client)?;
                ConsumerDriver::new(client, settings, mailbox).run()
            })
            .context("failed to spawn consumer driver thread")?;

        Ok(Self {
            commands,
            driver_thread: Arc::new(Mutex::new(Some(driver_thread))),
        })
    }

    /// Extends the manual assignment with `partitions` (additive union).
    pub fn assign(&self, partitions: HashSet<TopicPartition>) -> Result<(), DriverError> {
        self.send(DriverCommand::Assign(partitions))
    }

    /// Extends the assignment, then seeks each partition to its offset.
    pub fn assign_with_offsets(
        &self,
        offsets: HashMap<TopicPartition, i64>,
    ) -> Result<(), DriverError> {
        self.send(DriverCommand::AssignWithOffsets(offsets))
    }

    pub fn subscribe(
        &self,
        topics: Vec<String>,
        listener: Box<dyn RebalanceListener>,
    ) -> Result<(), DriverError> {
        self.send(DriverCommand::Subscribe { topics, listener })
    }

    /// Subscribes to every topic matching `pattern`. Takes a compiled regex
    /// so the pattern is built once, at the caller.
    pub fn subscribe_pattern(
        &self,
        pattern: Regex,
        listener: Box<dyn RebalanceListener>,
    ) -> Result<(), DriverError> {
        self.send(DriverCommand::SubscribePattern { pattern, listener })
    }

    /// One-shot demand: the driver replies with at most one `Messages` per
    /// poll cycle on `sink` until every requested partition has delivered,
    /// then the demand is spent and must be re-issued.
    pub fn request_messages(
        &self,
        requester: RequesterId,
        sink: MessageSink,
        partitions: HashSet<TopicPartition>,
    ) -> Result<(), DriverError> {
        self.send(DriverCommand::RequestMessages {
            requester: Requester {
                id: requester,
                sink,
            },
            partitions,
        })
    }

    /// Commits `offsets` and resolves once the broker has acknowledged.
    pub async fn commit(
        &self,
        offsets: HashMap<TopicPartition, i64>,
    ) -> Result<HashMap<TopicPartition, OffsetAndMetadata>, DriverError> {
        let (reply, response) = oneshot::channel();
        self.send(DriverCommand::Commit { offsets, reply })?;
        match response.await {
            Ok(result) => result,
            // The driver dropped the reply channel while terminating.
            Err(_) => Err(DriverError::Stopping),
        }
    }

    /// Tells the driver a requester died so its pending requests are purged.
    pub fn requester_gone(&self, requester: RequesterId) -> Result<(), DriverError> {
        self.send(DriverCommand::RequesterGone(requester))
    }

    /// Requests a graceful stop: in-flight commits drain, then the driver
    /// terminates. Safe to call more than once.
    pub fn stop(&self) {
        let _ = self.commands.send(DriverCommand::Stop);
    }

    /// Waits for the driver thread to exit and surfaces its terminal result.
    /// Returns `Ok(())` if another caller already collected it.
    pub async fn wait(&self) -> Result<(), DriverError> {
        let joinable = self.driver_thread.lock().unwrap().take();
        let Some(joinable) = joinable else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || match joinable.join() {
            Ok(result) => result,
            Err(_) => Err(DriverError::InvariantViolation(
                "driver thread panicked".to_string(),
            )),
        })
        .await
        .unwrap_or_else(|_| {
            Err(DriverError::InvariantViolation(
                "driver join task failed".to_string(),
            ))
        })
    }

    fn send(&self, command: DriverCommand) -> Result<(), DriverError> {
        self.commands
            .send(command)
            .map_err(|_| DriverError::Stopping)
    }
}
