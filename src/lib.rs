// Mailbox-driven coordinator for a single, non-thread-safe Kafka consumer:
// demand-pull record fetching, async offset commits and graceful drain, with
// every client operation serialized on one dedicated thread.
pub mod client;
pub mod commands;
pub mod config;
pub mod driver;
pub mod error;
pub mod handle;
pub mod metrics_consts;
pub mod rdkafka_client;
pub mod rebalance;
pub mod types;

#[cfg(test)]
pub mod test_utils;

// Public API - what embedding services should use
pub use client::{CommitCallback, DriverClient, PartitionControl};
pub use commands::{DriverCommand, MessageSink, Messages};
pub use config::{ConsumerConfigBuilder, DriverConfig, DriverSettings};
pub use driver::ConsumerDriver;
pub use error::DriverError;
pub use handle::DriverHandle;
pub use rdkafka_client::RdkafkaDriverClient;
pub use rebalance::{AutoPauseListener, NoopListener, RebalanceListener};
pub use types::{ConsumerRecord, OffsetAndMetadata, RecordBatch, RequesterId, TopicPartition};
