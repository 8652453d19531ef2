use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::ProgressStatus;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LearningEvent {
    AttemptRecorded(AttemptRecordedPayload),
    WordMastered(WordMasteredPayload),
    RecommendationsInvalidated(RecommendationsInvalidatedPayload),
    SessionStarted(SessionStartedPayload),
    ChatFailed(ChatFailedPayload),
}

impl LearningEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            LearningEvent::AttemptRecorded(_) => "ATTEMPT_RECORDED",
            LearningEvent::WordMastered(_) => "WORD_MASTERED",
            LearningEvent::RecommendationsInvalidated(_) => "RECOMMENDATIONS_INVALIDATED",
            LearningEvent::SessionStarted(_) => "SESSION_STARTED",
            LearningEvent::ChatFailed(_) => "CHAT_FAILED",
        }
    }

    pub fn child_id(&self) -> &str {
        match self {
            LearningEvent::AttemptRecorded(p) => &p.child_id,
            LearningEvent::WordMastered(p) => &p.child_id,
            LearningEvent::RecommendationsInvalidated(p) => &p.child_id,
            LearningEvent::SessionStarted(p) => &p.child_id,
            LearningEvent::ChatFailed(p) => &p.child_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecordedPayload {
    pub child_id: String,
    pub domain_id: String,
    pub word_id: String,
    pub correct: bool,
    pub status: ProgressStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordMasteredPayload {
    pub child_id: String,
    pub domain_id: String,
    pub word_id: String,
    pub mastered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationsInvalidatedPayload {
    pub child_id: String,
    pub domain_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStartedPayload {
    pub child_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatFailedPayload {
    pub child_id: String,
    pub session_id: Option<String>,
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub id: String,
    pub event: LearningEvent,
    pub created_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(event: LearningEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event,
            created_at: Utc::now(),
        }
    }
}

struct Subscriber {
    child_id: String,
    sender: broadcast::Sender<EventEnvelope>,
}

/// In-process fan-out of learning events to dashboard views. Publishing never
/// blocks and never fails; events without listeners are dropped.
pub struct EventBus {
    global_sender: broadcast::Sender<EventEnvelope>,
    subscribers: RwLock<HashMap<String, Subscriber>>,
    event_count: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        let (global_sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            global_sender,
            subscribers: RwLock::new(HashMap::new()),
            event_count: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: LearningEvent) {
        let envelope = EventEnvelope::new(event);
        self.event_count.fetch_add(1, Ordering::Relaxed);

        let mut sent_to = 0usize;
        for subscriber in self.subscribers.read().values() {
            if subscriber.child_id == envelope.event.child_id()
                && subscriber.sender.send(envelope.clone()).is_ok()
            {
                sent_to += 1;
            }
        }

        let event_type = envelope.event.event_type();
        let child_id = envelope.event.child_id().to_string();
        let _ = self.global_sender.send(envelope);

        debug!(event_type, child_id = %child_id, sent_to, "event published");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.global_sender.subscribe()
    }

    /// Receiver limited to one child's events, with an id for
    /// [`EventBus::unsubscribe`].
    pub fn subscribe_child(
        &self,
        child_id: impl Into<String>,
    ) -> (String, broadcast::Receiver<EventEnvelope>) {
        let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
        let subscriber_id = uuid::Uuid::new_v4().to_string();
        self.subscribers.write().insert(
            subscriber_id.clone(),
            Subscriber {
                child_id: child_id.into(),
                sender,
            },
        );
        (subscriber_id, receiver)
    }

    pub fn unsubscribe(&self, subscriber_id: &str) -> bool {
        self.subscribers.write().remove(subscriber_id).is_some()
    }

    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
