//! In-memory broker transport for testing and development.
//!
//! This module provides a fully functional in-process broker that:
//! - Delays messages until their `delay_seconds` elapse
//! - Discards never-received messages once their expiration passes
//! - Hides received messages for the visibility timeout and redelivers them
//!   if they are not acknowledged
//! - Routes messages to their dead-letter queue once the receive count is
//!   exhausted
//! - Wakes long-polling receivers as soon as messages become available
//!
//! Scheduling uses `tokio::time::Instant`, so tests can drive the clock with
//! `tokio::time::pause` and `tokio::time::advance`.

use crate::config::{InMemoryConfig, TransportType};
use crate::error::QueueError;
use crate::message::{
    ClientId, DeadLetterPolicy, Message, MessageAttributes, MessageId, QueueName, Timestamp,
};
use crate::results::{ReceivedBatch, SentMessage};
use crate::transport::{
    schedule_for, AckAllRequest, ReceiveRequest, SendReply, SendRequest, Settlement,
    SettleRequest, Transport,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Storage for all queues of the broker
struct BrokerState {
    queues: HashMap<QueueName, BrokerQueue>,
    config: InMemoryConfig,
    /// Wall-clock time paired with the scheduling clock at creation
    epoch: (Instant, Timestamp),
}

/// Internal state for a single queue
#[derive(Default)]
struct BrokerQueue {
    /// Waiting messages in sequence order, including delayed ones
    ready: VecDeque<StoredMessage>,
    /// Received messages awaiting acknowledgement
    in_flight: HashMap<MessageId, InFlightMessage>,
    next_sequence: u64,
}

impl BrokerQueue {
    fn len(&self) -> usize {
        self.ready.len() + self.in_flight.len()
    }

    fn push(&mut self, mut message: StoredMessage) {
        self.next_sequence += 1;
        message.sequence = self.next_sequence;
        self.ready.push_back(message);
    }

    /// Put a previously received message back in its original position
    fn requeue(&mut self, message: StoredMessage) {
        let position = self
            .ready
            .partition_point(|stored| stored.sequence < message.sequence);
        self.ready.insert(position, message);
    }

    fn discard_expired(&mut self, now: Instant) -> u32 {
        let before = self.ready.len();
        self.ready.retain(|stored| !stored.is_expired(now));
        u32::try_from(before - self.ready.len()).unwrap_or(u32::MAX)
    }

    fn next_available_at(&self, now: Instant) -> Option<Instant> {
        self.ready
            .iter()
            .map(|stored| stored.available_at)
            .filter(|at| *at > now)
            .min()
    }
}

/// A message stored in a queue with its delivery state
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    sequence: u64,
    body: Bytes,
    metadata: Option<String>,
    tags: HashMap<String, String>,
    sent_at: Timestamp,
    receive_count: u32,
    available_at: Instant,
    expires_at: Option<Instant>,
    expiration_at: Option<Timestamp>,
    delayed_to: Option<Timestamp>,
    dead_letter: Option<DeadLetterPolicy>,
    rerouted_from: Option<QueueName>,
}

impl StoredMessage {
    fn from_request(request: &SendRequest, now: Instant, sent_at: Timestamp) -> Self {
        let (expiration_at, delayed_to) = schedule_for(request, &sent_at);
        let expires_at = (request.expiration_seconds > 0)
            .then(|| now + Duration::from_secs(u64::from(request.expiration_seconds)));

        Self {
            message_id: MessageId::new(),
            sequence: 0,
            body: request.body.clone(),
            metadata: request.metadata.clone(),
            tags: request.tags.clone(),
            sent_at,
            receive_count: 0,
            available_at: now + Duration::from_secs(u64::from(request.delay_seconds)),
            expires_at,
            expiration_at,
            delayed_to,
            dead_letter: request.dead_letter.clone(),
            rerouted_from: None,
        }
    }

    /// Expiration only applies while the message has never been received
    fn is_expired(&self, now: Instant) -> bool {
        self.receive_count == 0 && self.expires_at.is_some_and(|at| now >= at)
    }

    fn is_available(&self, now: Instant) -> bool {
        now >= self.available_at
    }

    fn should_dead_letter(&self) -> Option<&QueueName> {
        self.dead_letter
            .as_ref()
            .filter(|policy| self.receive_count >= policy.max_receive_count)
            .map(|policy| &policy.queue)
    }

    fn sent(&self) -> SentMessage {
        SentMessage {
            message_id: self.message_id.clone(),
            sent_at: self.sent_at.clone(),
            expiration_at: self.expiration_at.clone(),
            delayed_to: self.delayed_to.clone(),
        }
    }

    fn to_message(&self) -> Message {
        Message {
            body: self.body.clone(),
            metadata: self.metadata.clone(),
            tags: self.tags.clone(),
            message_id: Some(self.message_id.clone()),
            max_receive_count: self.dead_letter.as_ref().map(|p| p.max_receive_count),
            dead_letter_queue: self
                .dead_letter
                .as_ref()
                .map(|p| p.queue.as_str().to_string()),
            attributes: Some(MessageAttributes {
                sent_at: self.sent_at.clone(),
                sequence: self.sequence,
                receive_count: self.receive_count,
                rerouted: self.rerouted_from.is_some(),
                rerouted_from_queue: self.rerouted_from.clone(),
                expiration_at: self.expiration_at.clone(),
                delayed_to: self.delayed_to.clone(),
            }),
            ..Message::default()
        }
    }
}

/// A message currently hidden by its visibility timeout
struct InFlightMessage {
    message: StoredMessage,
    client_id: ClientId,
    visible_at: Instant,
}

/// Result of one non-blocking poll of a queue
struct PollOutcome {
    messages: Vec<Message>,
    expired: u32,
    next_event: Option<Instant>,
}

impl BrokerState {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            queues: HashMap::new(),
            config,
            epoch: (Instant::now(), Timestamp::now()),
        }
    }

    /// Wall-clock reading of a scheduling instant, so reported times follow
    /// a paused or advanced clock
    fn timestamp_at(&self, now: Instant) -> Timestamp {
        let (started, started_at) = &self.epoch;
        started_at.plus_duration(now.saturating_duration_since(*started))
    }

    fn queue_mut(&mut self, name: &QueueName) -> Result<&mut BrokerQueue, QueueError> {
        if self.config.auto_create_queues {
            return Ok(self.queues.entry(name.clone()).or_default());
        }

        self.queues
            .get_mut(name)
            .ok_or_else(|| QueueError::QueueNotFound {
                queue_name: name.to_string(),
            })
    }

    /// A queue that can take one more message
    fn queue_with_room(&mut self, name: &QueueName) -> Result<&mut BrokerQueue, QueueError> {
        let max_size = self.config.max_queue_size;
        let queue = self.queue_mut(name)?;

        if queue.len() >= max_size {
            return Err(QueueError::QueueFull {
                queue_name: name.to_string(),
                max_size,
            });
        }
        Ok(queue)
    }

    fn enqueue(&mut self, request: &SendRequest, now: Instant) -> Result<SendReply, QueueError> {
        let sent_at = self.timestamp_at(now);
        let queue = self.queue_with_room(&request.queue)?;

        let stored = StoredMessage::from_request(request, now, sent_at);
        let sent = stored.sent();
        queue.push(stored);
        Ok(sent)
    }

    /// Return messages whose visibility timeout elapsed to their queues
    fn reclaim_expired_locks(&mut self, now: Instant) -> bool {
        let mut released = Vec::new();
        for (name, queue) in self.queues.iter_mut() {
            let expired: Vec<MessageId> = queue
                .in_flight
                .iter()
                .filter(|(_, in_flight)| in_flight.visible_at <= now)
                .map(|(id, _)| id.clone())
                .collect();

            for id in expired {
                if let Some(in_flight) = queue.in_flight.remove(&id) {
                    released.push((name.clone(), in_flight.message));
                }
            }
        }

        let any_released = !released.is_empty();
        for (origin, message) in released {
            self.release(&origin, message, now);
        }
        any_released
    }

    /// Make an unacknowledged message visible again or dead-letter it.
    ///
    /// A dead-letter queue that is missing or full leaves the message on its
    /// own queue, where it is redelivered and offered for routing again on
    /// its next release.
    fn release(&mut self, origin: &QueueName, mut message: StoredMessage, now: Instant) {
        message.available_at = now;

        if let Some(dead_letter_queue) = message.should_dead_letter().cloned() {
            match self.queue_with_room(&dead_letter_queue) {
                Ok(target) => {
                    debug!(
                        message_id = %message.message_id,
                        queue = %origin,
                        dead_letter_queue = %dead_letter_queue,
                        receive_count = message.receive_count,
                        "Routing message to dead-letter queue"
                    );

                    message.receive_count = 0;
                    message.dead_letter = None;
                    message.expires_at = None;
                    message.expiration_at = None;
                    message.rerouted_from = Some(origin.clone());
                    target.push(message);
                    return;
                }
                Err(error) => warn!(
                    message_id = %message.message_id,
                    queue = %origin,
                    dead_letter_queue = %dead_letter_queue,
                    error = %error,
                    "Dead-letter queue unavailable, keeping message on its queue"
                ),
            }
        }

        self.queues
            .entry(origin.clone())
            .or_default()
            .requeue(message);
    }

    fn next_lock_expiry(&self) -> Option<Instant> {
        self.queues
            .values()
            .flat_map(|queue| queue.in_flight.values())
            .map(|in_flight| in_flight.visible_at)
            .min()
    }

    fn poll(&mut self, request: &ReceiveRequest, now: Instant) -> Result<PollOutcome, QueueError> {
        self.reclaim_expired_locks(now);

        let max_messages = usize::try_from(request.max_messages).unwrap_or(usize::MAX);
        let visibility = Duration::from_secs(u64::from(request.visibility_timeout_seconds));
        let queue = self.queue_mut(&request.queue)?;
        let expired = queue.discard_expired(now);

        let messages = if request.is_peek {
            queue
                .ready
                .iter()
                .filter(|stored| stored.is_available(now))
                .take(max_messages)
                .map(StoredMessage::to_message)
                .collect()
        } else {
            let mut taken = Vec::new();
            let mut remaining = VecDeque::with_capacity(queue.ready.len());
            for stored in queue.ready.drain(..) {
                if taken.len() < max_messages && stored.is_available(now) {
                    taken.push(stored);
                } else {
                    remaining.push_back(stored);
                }
            }
            queue.ready = remaining;

            taken
                .into_iter()
                .map(|mut stored| {
                    stored.receive_count += 1;
                    let message = stored.to_message();
                    queue.in_flight.insert(
                        stored.message_id.clone(),
                        InFlightMessage {
                            message: stored,
                            client_id: request.client_id.clone(),
                            visible_at: now + visibility,
                        },
                    );
                    message
                })
                .collect()
        };

        let next_available = queue.next_available_at(now);
        let next_event = match (next_available, self.next_lock_expiry()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        Ok(PollOutcome {
            messages,
            expired,
            next_event,
        })
    }
}

// ============================================================================
// InMemoryTransport
// ============================================================================

/// In-process broker transport.
///
/// Clones share the same broker, so several clients (for example one on a
/// work queue and one on its dead-letter queue) can observe each other.
#[derive(Clone)]
pub struct InMemoryTransport {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl InMemoryTransport {
    /// Create new in-memory broker with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::new(config))),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Register a queue, needed when `auto_create_queues` is off
    pub fn create_queue(&self, name: &QueueName) {
        self.lock().queues.entry(name.clone()).or_default();
    }

    /// Number of messages held by a queue, visible or not
    pub fn queue_depth(&self, name: &QueueName) -> Option<usize> {
        self.lock().queues.get(name).map(BrokerQueue::len)
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn poll(&self, request: &ReceiveRequest) -> Result<PollOutcome, QueueError> {
        self.lock().poll(request, Instant::now())
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("queues", &self.lock().queues.len())
            .finish()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send_message(&self, request: &SendRequest) -> Result<SendReply, QueueError> {
        let sent = self.lock().enqueue(request, Instant::now())?;
        self.notify.notify_waiters();
        Ok(sent)
    }

    async fn send_messages(
        &self,
        _batch_id: &str,
        requests: &[SendRequest],
    ) -> Result<Vec<Result<SendReply, QueueError>>, QueueError> {
        let now = Instant::now();
        let results = {
            let mut state = self.lock();
            requests
                .iter()
                .map(|request| state.enqueue(request, now))
                .collect()
        };
        self.notify.notify_waiters();
        Ok(results)
    }

    async fn receive_messages(
        &self,
        request: &ReceiveRequest,
    ) -> Result<ReceivedBatch, QueueError> {
        let deadline =
            Instant::now() + Duration::from_secs(u64::from(request.wait_timeout_seconds));
        let mut messages_expired = 0u32;

        loop {
            // Register for wake-ups before looking, so an enqueue between the
            // poll and the wait is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let poll = self.poll(request)?;
            messages_expired = messages_expired.saturating_add(poll.expired);

            if !poll.messages.is_empty() || Instant::now() >= deadline {
                return Ok(ReceivedBatch {
                    messages: poll.messages,
                    messages_expired,
                });
            }

            let wake_at = poll
                .next_event
                .map_or(deadline, |event| event.min(deadline));

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack_all_messages(&self, request: &AckAllRequest) -> Result<u64, QueueError> {
        let mut state = self.lock();
        let now = Instant::now();
        if state.reclaim_expired_locks(now) {
            self.notify.notify_waiters();
        }

        let queue = state.queue_mut(&request.queue)?;
        let before = queue.in_flight.len();
        queue
            .in_flight
            .retain(|_, in_flight| in_flight.client_id != request.client_id);

        Ok(u64::try_from(before - queue.in_flight.len()).unwrap_or(u64::MAX))
    }

    async fn settle_message(&self, request: &SettleRequest) -> Result<(), QueueError> {
        let mut state = self.lock();
        let now = Instant::now();
        state.reclaim_expired_locks(now);

        let queue = state.queue_mut(&request.queue)?;
        let held_by_client = queue
            .in_flight
            .get(&request.message_id)
            .is_some_and(|in_flight| in_flight.client_id == request.client_id);

        let removed = if held_by_client {
            queue.in_flight.remove(&request.message_id)
        } else {
            None
        };
        let in_flight = removed.ok_or_else(|| QueueError::MessageNotFound {
            message_id: request.message_id.to_string(),
        })?;

        if request.settlement == Settlement::Reject {
            state.release(&request.queue, in_flight.message, now);
            drop(state);
            self.notify.notify_waiters();
        }

        Ok(())
    }

    fn transport_type(&self) -> TransportType {
        TransportType::InMemory
    }
}
