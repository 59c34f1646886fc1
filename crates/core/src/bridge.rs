//! # Progress Event Bridge
//!
//! Decouples the research engine's progress emission from the orchestrator's
//! consumption loop. The engine runs as an independently spawned task,
//! possibly on another worker thread; `publish` must therefore never block
//! the producer, and `drain_available` never blocks the consumer. The queue
//! mutex is held only for push/drain, never across an await.
//!
//! ```text
//! Research Engine Task                 Orchestrator Drain Loop
//!        │                                      │
//!        ├── publish(event) ──▶ [FIFO queue] ──▶├ drain_available()
//!        ├── publish(event) ──▶      ...        ├ (every poll interval)
//!        │                                      │
//! ```
//!
//! A queue exists only between `open` and `close`; events published outside
//! that window are logged and discarded, because the consumer for that run
//! has stopped polling.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::events::ProgressEvent;

type Queues = HashMap<String, VecDeque<ProgressEvent>>;

/// Per-session FIFO queues for run progress
#[derive(Default)]
pub struct EventBridge {
    queues: Mutex<Queues>,
}

impl EventBridge {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the queue for a new run, clearing anything stale
    pub fn open(&self, session_id: &str) {
        self.lock().insert(session_id.to_string(), VecDeque::new());
    }

    /// Enqueue an event. Non-blocking; discards (with a log line) when the
    /// session has no open run.
    pub fn publish(&self, session_id: &str, event: ProgressEvent) {
        let mut queues = self.lock();
        match queues.get_mut(session_id) {
            Some(queue) => queue.push_back(event),
            None => {
                tracing::debug!(
                    session_id,
                    kind = ?event.kind,
                    "discarding progress event published after run terminated"
                );
            }
        }
    }

    /// Take every currently queued event, in publish order. Non-blocking.
    pub fn drain_available(&self, session_id: &str) -> Vec<ProgressEvent> {
        let mut queues = self.lock();
        match queues.get_mut(session_id) {
            Some(queue) => queue.drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Close the queue; later publishes for this session are discarded
    pub fn close(&self, session_id: &str) {
        let dropped = self
            .lock()
            .remove(session_id)
            .map(|q| q.len())
            .unwrap_or(0);
        if dropped > 0 {
            tracing::debug!(session_id, dropped, "closed bridge with undrained events");
        }
    }

    /// Number of queued events, for the status surface
    pub fn pending(&self, session_id: &str) -> usize {
        self.lock().get(session_id).map(|q| q.len()).unwrap_or(0)
    }

    /// Hand out the producer-side handle for a session's run
    pub fn publisher(self: &Arc<Self>, session_id: &str) -> ProgressPublisher {
        ProgressPublisher {
            bridge: Arc::clone(self),
            session_id: session_id.to_string(),
        }
    }
}

/// Cheap cloneable handle the research engine publishes through
#[derive(Clone)]
pub struct ProgressPublisher {
    bridge: Arc<EventBridge>,
    session_id: String,
}

impl ProgressPublisher {
    /// Publish an event, stamping it with this run's session id
    pub fn publish(&self, event: ProgressEvent) {
        let event = event.for_session(&self.session_id);
        self.bridge.publish(&self.session_id, event);
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ProgressEvent, ProgressKind};

    fn status(message: &str) -> ProgressEvent {
        ProgressEvent::new(ProgressKind::AgentStarted).with_message(message)
    }

    #[test]
    fn test_drain_preserves_publish_order() {
        let bridge = EventBridge::new();
        bridge.open("s");
        for i in 0..10 {
            bridge.publish("s", status(&format!("m{i}")));
        }

        let drained = bridge.drain_available("s");
        assert_eq!(drained.len(), 10);
        for (i, event) in drained.iter().enumerate() {
            assert_eq!(event.message.as_deref(), Some(format!("m{i}").as_str()));
        }
        assert!(bridge.drain_available("s").is_empty());
    }

    #[test]
    fn test_publish_after_close_is_discarded() {
        let bridge = EventBridge::new();
        bridge.open("s");
        bridge.close("s");
        bridge.publish("s", status("late"));
        assert_eq!(bridge.pending("s"), 0);
        assert!(bridge.drain_available("s").is_empty());
    }

    #[test]
    fn test_open_clears_stale_events() {
        let bridge = EventBridge::new();
        bridge.open("s");
        bridge.publish("s", status("stale"));
        bridge.open("s");
        assert_eq!(bridge.pending("s"), 0);
    }

    #[test]
    fn test_sessions_do_not_interleave() {
        let bridge = EventBridge::new();
        bridge.open("a");
        bridge.open("b");
        bridge.publish("a", status("for-a"));
        bridge.publish("b", status("for-b"));

        let a = bridge.drain_available("a");
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].message.as_deref(), Some("for-a"));
        assert_eq!(bridge.pending("b"), 1);
    }

    #[test]
    fn test_publisher_stamps_session() {
        let bridge = Arc::new(EventBridge::new());
        bridge.open("s");
        let publisher = bridge.publisher("s");
        publisher.publish(status("hello"));

        let drained = bridge.drain_available("s");
        assert_eq!(drained[0].session_id.as_deref(), Some("s"));
    }

    #[tokio::test]
    async fn test_cross_task_publish_is_drained() {
        let bridge = Arc::new(EventBridge::new());
        bridge.open("s");
        let publisher = bridge.publisher("s");

        let producer = tokio::spawn(async move {
            for i in 0..50 {
                publisher.publish(status(&format!("m{i}")));
                tokio::task::yield_now().await;
            }
        });

        let mut seen = Vec::new();
        while seen.len() < 50 {
            seen.extend(bridge.drain_available("s"));
            tokio::task::yield_now().await;
        }
        producer.await.unwrap();

        for (i, event) in seen.iter().enumerate() {
            assert_eq!(event.message.as_deref(), Some(format!("m{i}").as_str()));
        }
    }
}
