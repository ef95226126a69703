use tracing::{debug, warn};

use crate::client::PartitionControl;
use crate::types::TopicPartition;

/// User-supplied callback pair invoked when the broker reassigns partitions
/// across consumer-group members.
///
/// Callbacks run on the driver thread from inside `poll`, so implementations
/// must not block and must not send commands back to the driver mailbox (the
/// command would be processed after the current handler, reordering
/// surprisingly).
pub trait RebalanceListener: Send {
    fn on_partitions_assigned(
        &mut self,
        client: &mut dyn PartitionControl,
        partitions: &[TopicPartition],
    );

    fn on_partitions_revoked(
        &mut self,
        client: &mut dyn PartitionControl,
        partitions: &[TopicPartition],
    );
}

/// Listener for callers that do not care about rebalances.
#[derive(Debug, Default)]
pub struct NoopListener;

impl RebalanceListener for NoopListener {
    fn on_partitions_assigned(
        &mut self,
        _client: &mut dyn PartitionControl,
        _partitions: &[TopicPartition],
    ) {
    }

    fn on_partitions_revoked(
        &mut self,
        _client: &mut dyn PartitionControl,
        _partitions: &[TopicPartition],
    ) {
    }
}

/// Pauses newly assigned partitions before the wrapped listener sees them.
///
/// A fresh assignment has no outstanding record request yet, so it must not
/// be fetched; the next poll cycle resumes exactly the partitions a
/// downstream has asked for. Revocations are forwarded unchanged.
pub struct AutoPauseListener {
    inner: Box<dyn RebalanceListener>,
}

impl AutoPauseListener {
    pub fn new(inner: Box<dyn RebalanceListener>) -> Self {
        Self { inner }
    }
}

impl RebalanceListener for AutoPauseListener {
    fn on_partitions_assigned(
        &mut self,
        client: &mut dyn PartitionControl,
        partitions: &[TopicPartition],
    ) {
        if let Err(e) = client.pause(partitions) {
            warn!("failed to pause newly assigned partitions: {e}");
        } else {
            debug!("paused {} newly assigned partitions", partitions.len());
        }
        self.inner.on_partitions_assigned(client, partitions);
    }

    fn on_partitions_revoked(
        &mut self,
        client: &mut dyn PartitionControl,
        partitions: &[TopicPartition],
    ) {
        self.inner.on_partitions_revoked(client, partitions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::error::KafkaError;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct JournalingControl {
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl PartitionControl for JournalingControl {
        fn pause(&mut self, partitions: &[TopicPartition]) -> Result<(), KafkaError> {
            for partition in partitions {
                self.journal.lock().unwrap().push(format!("pause:{partition}"));
            }
            Ok(())
        }

        fn resume(&mut self, partitions: &[TopicPartition]) -> Result<(), KafkaError> {
            for partition in partitions {
                self.journal
                    .lock()
                    .unwrap()
                    .push(format!("resume:{partition}"));
            }
            Ok(())
        }
    }

    struct JournalingListener {
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl RebalanceListener for JournalingListener {
        fn on_partitions_assigned(
            &mut self,
            _client: &mut dyn PartitionControl,
            partitions: &[TopicPartition],
        ) {
            for partition in partitions {
                self.journal
                    .lock()
                    .unwrap()
                    .push(format!("assigned:{partition}"));
            }
        }

        fn on_partitions_revoked(
            &mut self,
            _client: &mut dyn PartitionControl,
            partitions: &[TopicPartition],
        ) {
            for partition in partitions {
                self.journal
                    .lock()
                    .unwrap()
                    .push(format!("revoked:{partition}"));
            }
        }
    }

    #[test]
    fn pause_happens_before_the_inner_listener() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut control = JournalingControl {
            journal: journal.clone(),
        };
        let mut adapter = AutoPauseListener::new(Box::new(JournalingListener {
            journal: journal.clone(),
        }));

        let partitions = vec![TopicPartition::new("events", 0)];
        adapter.on_partitions_assigned(&mut control, &partitions);

        assert_eq!(
            *journal.lock().unwrap(),
            vec!["pause:events-0".to_string(), "assigned:events-0".to_string()]
        );
    }

    #[test]
    fn revocations_are_forwarded_without_touching_pause_state() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut control = JournalingControl {
            journal: journal.clone(),
        };
        let mut adapter = AutoPauseListener::new(Box::new(JournalingListener {
            journal: journal.clone(),
        }));

        let partitions = vec![TopicPartition::new("events", 1)];
        adapter.on_partitions_revoked(&mut control, &partitions);

        assert_eq!(*journal.lock().unwrap(), vec!["revoked:events-1".to_string()]);
    }
}
