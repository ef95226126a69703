//! Metric names emitted by the consumer driver.

pub const DRIVER_POLLS: &str = "kafka_driver_polls_total";
pub const DRIVER_RECORDS_DISPATCHED: &str = "kafka_driver_records_dispatched_total";
pub const DRIVER_COMMITS_IN_FLIGHT: &str = "kafka_driver_commits_in_flight";
pub const DRIVER_COMMIT_FAILURES: &str = "kafka_driver_commit_failures_total";
pub const DRIVER_PENDING_REQUESTS: &str = "kafka_driver_pending_requests";
pub const DRIVER_REJECTED_WHILE_STOPPING: &str = "kafka_driver_rejected_while_stopping_total";
