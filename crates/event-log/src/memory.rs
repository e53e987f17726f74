use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::{
    Delivery, DeliveryReceipt, EventConsumer, EventLog, EventLogError, EventProducer,
    OutboundMessage, Result,
};

#[derive(Debug, Clone)]
struct StoredMessage {
    key: String,
    payload: Vec<u8>,
    headers: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct GroupState {
    next_offset: usize,
    redeliveries: VecDeque<usize>,
    in_flight: HashMap<usize, u32>,
    attempts: HashMap<usize, u32>,
    acked: usize,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, Vec<StoredMessage>>,
    groups: HashMap<(String, String), GroupState>,
    unavailable: bool,
}

impl BrokerState {
    fn claim_next(&mut self, topic: &str, group: &str) -> Option<Delivery> {
        let messages = self.topics.get(topic)?;
        let state = self
            .groups
            .entry((topic.to_string(), group.to_string()))
            .or_default();

        let offset = match state.redeliveries.pop_front() {
            Some(offset) => offset,
            None if state.next_offset < messages.len() => {
                state.next_offset += 1;
                state.next_offset - 1
            }
            None => return None,
        };

        let attempt = state.attempts.entry(offset).or_insert(0);
        *attempt += 1;
        let attempt = *attempt;
        state.in_flight.insert(offset, attempt);

        let message = &messages[offset];
        Some(Delivery {
            topic: topic.to_string(),
            partition: 0,
            offset: offset as i64,
            key: Some(message.key.clone()),
            payload: message.payload.clone(),
            headers: message.headers.clone(),
            attempt,
        })
    }
}

/// In-memory broker for tests and single-process development.
///
/// Every topic has a single partition, so delivery order equals send order.
/// New consumer groups start from the earliest offset. A delivery stays
/// in flight until acked; nacked or recovered deliveries go back to the front
/// of the group's queue.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventLog {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl InMemoryEventLog {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a broker outage (`false`) or its recovery (`true`).
    pub async fn set_available(&self, available: bool) {
        self.state.lock().await.unavailable = !available;
        self.notify.notify_waiters();
    }

    /// Returns every message appended to `topic`, in order.
    pub async fn messages(&self, topic: &str) -> Vec<Delivery> {
        let state = self.state.lock().await;
        state
            .topics
            .get(topic)
            .map(|messages| {
                messages
                    .iter()
                    .enumerate()
                    .map(|(offset, message)| Delivery {
                        topic: topic.to_string(),
                        partition: 0,
                        offset: offset as i64,
                        key: Some(message.key.clone()),
                        payload: message.payload.clone(),
                        headers: message.headers.clone(),
                        attempt: 0,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the number of messages appended to `topic`.
    pub async fn message_count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .await
            .topics
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Returns how many deliveries `group` has acknowledged on `topic`.
    pub async fn acked_count(&self, topic: &str, group: &str) -> usize {
        self.state
            .lock()
            .await
            .groups
            .get(&(topic.to_string(), group.to_string()))
            .map_or(0, |g| g.acked)
    }

    /// Returns how many deliveries of `group` on `topic` await acknowledgment.
    pub async fn in_flight_count(&self, topic: &str, group: &str) -> usize {
        self.state
            .lock()
            .await
            .groups
            .get(&(topic.to_string(), group.to_string()))
            .map_or(0, |g| g.in_flight.len())
    }

    /// Simulates the crash of every member of `group`: all unacknowledged
    /// deliveries become eligible for redelivery, oldest first.
    pub async fn recover_in_flight(&self, topic: &str, group: &str) -> usize {
        let mut state = self.state.lock().await;
        let Some(group_state) = state.groups.get_mut(&(topic.to_string(), group.to_string()))
        else {
            return 0;
        };

        let mut offsets: Vec<usize> = group_state.in_flight.drain().map(|(o, _)| o).collect();
        offsets.sort_unstable();
        let recovered = offsets.len();
        for offset in offsets.into_iter().rev() {
            group_state.redeliveries.push_front(offset);
        }
        drop(state);

        if recovered > 0 {
            tracing::info!(topic, group, recovered, "requeued in-flight deliveries");
            self.notify.notify_waiters();
        }
        recovered
    }
}

#[async_trait]
impl EventProducer for InMemoryEventLog {
    async fn send(&self, message: OutboundMessage) -> Result<DeliveryReceipt> {
        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(EventLogError::Unavailable(
                "in-memory broker is offline".to_string(),
            ));
        }

        let log = state.topics.entry(message.topic.clone()).or_default();
        log.push(StoredMessage {
            key: message.key,
            payload: message.payload,
            headers: message.headers,
        });
        let offset = (log.len() - 1) as i64;
        drop(state);

        self.notify.notify_waiters();

        Ok(DeliveryReceipt {
            topic: message.topic,
            partition: 0,
            offset,
        })
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    type Consumer = InMemoryConsumer;

    async fn subscribe(&self, topic: &str, group: &str) -> Result<InMemoryConsumer> {
        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(EventLogError::SubscriptionFailed {
                topic: topic.to_string(),
                group: group.to_string(),
                reason: "in-memory broker is offline".to_string(),
            });
        }
        state
            .groups
            .entry((topic.to_string(), group.to_string()))
            .or_default();

        tracing::debug!(topic, group, "consumer joined group");

        Ok(InMemoryConsumer {
            log: self.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
        })
    }
}

/// One member of an in-memory consumer group.
#[derive(Debug, Clone)]
pub struct InMemoryConsumer {
    log: InMemoryEventLog,
    topic: String,
    group: String,
}

#[async_trait]
impl EventConsumer for InMemoryConsumer {
    async fn next(&self) -> Result<Delivery> {
        loop {
            // Registered before the state check so a send between the check
            // and the await still wakes us.
            let notified = self.log.notify.notified();

            {
                let mut state = self.log.state.lock().await;
                if state.unavailable {
                    return Err(EventLogError::Unavailable(
                        "in-memory broker is offline".to_string(),
                    ));
                }
                if let Some(delivery) = state.claim_next(&self.topic, &self.group) {
                    return Ok(delivery);
                }
            }

            notified.await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut state = self.log.state.lock().await;
        let group = state
            .groups
            .entry((self.topic.clone(), self.group.clone()))
            .or_default();

        let offset = delivery.offset as usize;
        if group.in_flight.remove(&offset).is_some() {
            group.attempts.remove(&offset);
            group.acked += 1;
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        let mut state = self.log.state.lock().await;
        let group = state
            .groups
            .entry((self.topic.clone(), self.group.clone()))
            .or_default();

        let offset = delivery.offset as usize;
        if group.in_flight.remove(&offset).is_some() {
            group.redeliveries.push_back(offset);
        }
        drop(state);

        self.log.notify.notify_waiters();
        Ok(())
    }
}
