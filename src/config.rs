use std::time::Duration;

use envconfig::Envconfig;
use rdkafka::config::ClientConfig;

/// Immutable timing settings of one driver instance.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Maximum block time of a demand-driven records poll. The poll blocks
    /// the entire mailbox, so this must stay short.
    pub poll_timeout: Duration,
    /// Period of the internal poll ticker that keeps commit and rebalance
    /// callbacks progressing when no downstream is requesting records.
    pub poll_interval: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Environment-driven configuration for services embedding the driver.
#[derive(Envconfig, Clone, Debug)]
pub struct DriverConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "kafka-driver")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "latest")]
    pub kafka_consumer_offset_reset: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "50")]
    pub poll_timeout_ms: u64,

    #[envconfig(default = "50")]
    pub poll_interval_ms: u64,
}

impl DriverConfig {
    pub fn settings(&self) -> DriverSettings {
        DriverSettings {
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    /// Assembles the rdkafka properties bag for this configuration.
    pub fn client_config(&self) -> ClientConfig {
        ConsumerConfigBuilder::new(&self.kafka_hosts, &self.kafka_consumer_group)
            .with_offset_reset(&self.kafka_consumer_offset_reset)
            .with_tls(self.kafka_tls)
            .build()
    }
}

/// Consumer configuration builder with defaults suited to driver-owned
/// polling: offsets move only through the driver's commit path, never
/// automatically.
pub struct ConsumerConfigBuilder {
    config: ClientConfig,
}

impl ConsumerConfigBuilder {
    pub fn new(bootstrap_servers: &str, group_id: &str) -> Self {
        let mut config = ClientConfig::new();

        // Required settings
        config
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id);

        config
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false")
            .set("socket.timeout.ms", "10000")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "5000")
            .set("max.poll.interval.ms", "300000");

        Self { config }
    }

    /// Override offset reset policy
    pub fn with_offset_reset(mut self, policy: &str) -> Self {
        self.config.set("auto.offset.reset", policy);
        self
    }

    /// Enable TLS/SSL for the Kafka connection
    pub fn with_tls(mut self, enabled: bool) -> Self {
        if enabled {
            self.config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }
        self
    }

    /// Add any custom configuration
    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.config.set(key, value);
        self
    }

    /// Build the final configuration
    pub fn build(self) -> ClientConfig {
        self.config
    }
}
