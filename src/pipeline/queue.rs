//! Ingestion queue between the event producer and the batch flusher.
//!
//! Insertion ordered, multi-producer, single-consumer. Unbounded unless a
//! capacity is configured, in which case [`OverflowPolicy`] decides what
//! happens to events that do not fit.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::models::AdvertisementEvent;

/// What to do with an event arriving at a full queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest queued event to make room
    #[default]
    DropOldest,
    /// Discard the arriving event
    DropNewest,
    /// Make the producer wait for the next drain
    Block,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "drop-oldest" | "oldest" => Ok(OverflowPolicy::DropOldest),
            "drop-newest" | "newest" => Ok(OverflowPolicy::DropNewest),
            "block" => Ok(OverflowPolicy::Block),
            other => Err(format!("unknown overflow policy '{}'", other)),
        }
    }
}

/// Queue sizing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of queued events, `None` for unbounded
    pub capacity: Option<usize>,
    pub overflow: OverflowPolicy,
}

/// Result of submitting one event
#[derive(Debug, Clone, PartialEq)]
pub enum Enqueued {
    Accepted,
    /// Accepted after evicting the oldest queued event
    DroppedOldest,
    /// Queue full, the submitted event was discarded
    DroppedNewest,
    /// Queue full under [`OverflowPolicy::Block`]; the event is handed back
    Full(AdvertisementEvent),
    /// Queue closed for shutdown; the event is handed back
    Closed(AdvertisementEvent),
}

#[derive(Debug, Default)]
struct State {
    events: VecDeque<AdvertisementEvent>,
    closed: bool,
    dropped: u64,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    space: Notify,
}

/// Cloneable handle to one shared ingestion queue
#[derive(Debug, Clone)]
pub struct IngestionQueue {
    shared: Arc<Shared>,
    config: QueueConfig,
}

impl IngestionQueue {
    pub fn new(config: QueueConfig) -> Self {
        IngestionQueue {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                space: Notify::new(),
            }),
            config,
        }
    }

    /// Queue without a capacity bound
    pub fn unbounded() -> Self {
        IngestionQueue::new(QueueConfig::default())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event without waiting
    pub fn enqueue(&self, event: AdvertisementEvent) -> Enqueued {
        let mut state = self.state();

        if state.closed {
            return Enqueued::Closed(event);
        }

        match self.config.capacity {
            Some(capacity) if state.events.len() >= capacity => match self.config.overflow {
                OverflowPolicy::DropOldest => {
                    state.events.pop_front();
                    state.events.push_back(event);
                    state.dropped += 1;
                    Enqueued::DroppedOldest
                }
                OverflowPolicy::DropNewest => {
                    state.dropped += 1;
                    Enqueued::DroppedNewest
                }
                OverflowPolicy::Block => Enqueued::Full(event),
            },
            _ => {
                state.events.push_back(event);
                Enqueued::Accepted
            }
        }
    }

    /// Append an event, waiting for the next drain while the queue is full
    ///
    /// Only [`OverflowPolicy::Block`] ever waits; never returns [`Enqueued::Full`].
    pub async fn enqueue_wait(&self, mut event: AdvertisementEvent) -> Enqueued {
        loop {
            let notified = self.shared.space.notified();
            tokio::pin!(notified);
            // Register before checking so a drain in between is not missed
            notified.as_mut().enable();

            match self.enqueue(event) {
                Enqueued::Full(returned) => {
                    event = returned;
                    notified.await;
                }
                outcome => return outcome,
            }
        }
    }

    /// Remove and return every queued event in insertion order
    ///
    /// Events enqueued after the snapshot stay queued for the next drain.
    pub fn drain_all(&self) -> Vec<AdvertisementEvent> {
        let drained = {
            let mut state = self.state();
            Vec::from(std::mem::take(&mut state.events))
        };

        if !drained.is_empty() {
            self.shared.space.notify_waiters();
        }
        drained
    }

    /// Refuse further events; queued events can still be drained
    pub fn close(&self) {
        self.state().closed = true;
        self.shared.space.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn len(&self) -> usize {
        self.state().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().events.is_empty()
    }

    /// Total events lost to overflow since creation
    pub fn dropped(&self) -> u64 {
        self.state().dropped
    }
}
