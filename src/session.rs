//! Session continuity for the child's chat with the assistant.
//!
//! Each child has one conversation: an opaque backend session id plus an
//! ordered local log. User messages are written to the log before the
//! request leaves; replies and failure notices land next to the message that
//! caused them, so log position follows send order, not arrival order.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::api::LearningApi;
use crate::error::{ClientError, ClientResult};
use crate::events::{ChatFailedPayload, EventBus, LearningEvent, SessionStartedPayload};
use crate::models::{ChatMessage, ChatRequest};
use crate::store::LocalStore;

pub const FAILURE_TEXT: &str = "Sorry, something went wrong. Please try again.";

const SLOT_SENT: u8 = 0;
const SLOT_REPLY: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatEntry {
    pub seq: u64,
    pub message: ChatMessage,
    pub state: EntryState,
}

// ============================================================
// ChatLog - pure, ordered by (send seq, slot)
// ============================================================

#[derive(Debug, Default, Clone)]
pub struct ChatLog {
    next_seq: u64,
    entries: BTreeMap<(u64, u8), ChatEntry>,
    /// Seqs handed out by `begin_send` that a history reload moved.
    moved: HashMap<u64, u64>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provisional write of a user message. The returned seq fixes its
    /// position and the position of whatever answers it.
    pub fn begin_send(&mut self, message: ChatMessage) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            (seq, SLOT_SENT),
            ChatEntry {
                seq,
                message,
                state: EntryState::Pending,
            },
        );
        seq
    }

    /// Confirms the send and places the reply right after it. False when the
    /// send is no longer in the log.
    pub fn complete(&mut self, seq: u64, reply: ChatMessage) -> bool {
        self.settle(seq, EntryState::Confirmed, reply)
    }

    /// Marks the send failed and places a system notice after it. The user's
    /// message stays.
    pub fn fail(&mut self, seq: u64, notice: ChatMessage) -> bool {
        self.settle(seq, EntryState::Failed, notice)
    }

    /// Where a send issued as `seq` sits now.
    pub fn resolve(&self, seq: u64) -> u64 {
        self.moved.get(&seq).copied().unwrap_or(seq)
    }

    fn settle(&mut self, seq: u64, state: EntryState, reply: ChatMessage) -> bool {
        let seq = self.resolve(seq);
        let Some(sent) = self.entries.get_mut(&(seq, SLOT_SENT)) else {
            return false;
        };
        if sent.state != EntryState::Pending {
            return false;
        }
        sent.state = state;
        self.entries.insert(
            (seq, SLOT_REPLY),
            ChatEntry {
                seq,
                message: reply,
                state,
            },
        );
        true
    }

    pub fn entries(&self) -> Vec<ChatEntry> {
        self.entries.values().cloned().collect()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.entries.values().map(|e| e.message.clone()).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.state == EntryState::Pending)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces the log with server history. Sends still pending follow the
    /// history in their original order and can still be settled by the seq
    /// `begin_send` returned.
    pub fn replace_with_history(&mut self, history: Vec<ChatMessage>) {
        let pending: Vec<ChatEntry> = self
            .entries
            .values()
            .filter(|e| e.state == EntryState::Pending)
            .cloned()
            .collect();
        self.entries.clear();

        for message in history {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.entries.insert(
                (seq, SLOT_SENT),
                ChatEntry {
                    seq,
                    message,
                    state: EntryState::Confirmed,
                },
            );
        }

        for mut entry in pending {
            let seq = self.next_seq;
            self.next_seq += 1;
            for target in self.moved.values_mut() {
                if *target == entry.seq {
                    *target = seq;
                }
            }
            self.moved.insert(entry.seq, seq);
            entry.seq = seq;
            self.entries.insert((seq, SLOT_SENT), entry);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatExchange {
    pub session_id: String,
    /// Position of the send in the log when the reply landed.
    pub seq: u64,
    pub reply: ChatMessage,
}

#[derive(Default)]
struct ConversationState {
    session_id: Option<String>,
    log: ChatLog,
}

/// `send_lock` is held for the whole round trip only while no session id is
/// known, so a second message waits for the id the first one allocates.
#[derive(Default)]
struct Conversation {
    send_lock: AsyncMutex<()>,
    state: Mutex<ConversationState>,
}

impl Conversation {
    fn resumed(session_id: Option<String>) -> Self {
        Self {
            send_lock: AsyncMutex::new(()),
            state: Mutex::new(ConversationState {
                session_id,
                log: ChatLog::new(),
            }),
        }
    }
}

pub struct ChatSessionClient {
    api: Arc<dyn LearningApi>,
    store: Arc<LocalStore>,
    events: Arc<EventBus>,
    conversations: Mutex<HashMap<String, Arc<Conversation>>>,
}

impl ChatSessionClient {
    pub fn new(api: Arc<dyn LearningApi>, store: Arc<LocalStore>, events: Arc<EventBus>) -> Self {
        Self {
            api,
            store,
            events,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    fn conversation(&self, child_id: &str) -> Arc<Conversation> {
        let mut conversations = self.conversations.lock();
        let conversation = conversations.entry(child_id.to_string()).or_insert_with(|| {
            Arc::new(Conversation::resumed(self.store.session_for(child_id)))
        });
        Arc::clone(conversation)
    }

    fn is_current(&self, child_id: &str, conversation: &Arc<Conversation>) -> bool {
        self.conversations
            .lock()
            .get(child_id)
            .is_some_and(|c| Arc::ptr_eq(c, conversation))
    }

    pub fn session_id(&self, child_id: &str) -> Option<String> {
        self.conversation(child_id).state.lock().session_id.clone()
    }

    pub fn transcript(&self, child_id: &str) -> Vec<ChatMessage> {
        self.conversation(child_id).state.lock().log.messages()
    }

    pub fn entries(&self, child_id: &str) -> Vec<ChatEntry> {
        self.conversation(child_id).state.lock().log.entries()
    }

    /// Appends `text` to the log at once, then sends it with the most
    /// recently known session id. On failure a system notice is logged in
    /// place of the reply and the transport error is returned.
    pub async fn send_message(
        &self,
        child_id: &str,
        text: &str,
        domain_id: Option<&str>,
    ) -> ClientResult<ChatExchange> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::EmptyMessage);
        }

        let conversation = self.conversation(child_id);
        let seq = conversation
            .state
            .lock()
            .log
            .begin_send(ChatMessage::user(text));

        let mut turn = Some(conversation.send_lock.lock().await);
        let session_id = conversation.state.lock().session_id.clone();
        if session_id.is_some() {
            turn = None;
        }

        let request = ChatRequest {
            session_id: session_id.clone(),
            child_id: child_id.to_string(),
            message: text.to_string(),
            domain_id: domain_id.map(str::to_string),
        };

        let result = self.api.send_chat_message(&request).await;
        let outcome = match result {
            Ok(response) => {
                let (seq, changed) = {
                    let mut state = conversation.state.lock();
                    state.log.complete(seq, response.message.clone());
                    let changed =
                        state.session_id.as_deref() != Some(response.session_id.as_str());
                    if changed {
                        state.session_id = Some(response.session_id.clone());
                    }
                    (state.log.resolve(seq), changed)
                };

                if changed {
                    self.adopt_session(
                        child_id,
                        &conversation,
                        session_id.as_deref(),
                        &response.session_id,
                    );
                }

                debug!(child_id, session_id = %response.session_id, seq, "chat reply received");
                Ok(ChatExchange {
                    session_id: response.session_id,
                    seq,
                    reply: response.message,
                })
            }
            Err(err) => {
                warn!(child_id, session_id = ?session_id, seq, error = %err, "chat message failed");
                conversation
                    .state
                    .lock()
                    .log
                    .fail(seq, ChatMessage::system(FAILURE_TEXT));
                self.events.publish(LearningEvent::ChatFailed(ChatFailedPayload {
                    child_id: child_id.to_string(),
                    session_id,
                    code: err.code().to_string(),
                }));
                Err(err)
            }
        };

        drop(turn);
        outcome
    }

    fn adopt_session(
        &self,
        child_id: &str,
        conversation: &Arc<Conversation>,
        sent: Option<&str>,
        received: &str,
    ) {
        match sent {
            None => info!(child_id, session_id = received, "chat session started"),
            Some(previous) => warn!(
                child_id,
                previous,
                session_id = received,
                "backend answered under a different session id"
            ),
        }

        if !self.is_current(child_id, conversation) {
            debug!(child_id, "conversation cleared while sending, session not persisted");
            return;
        }
        if let Err(e) = self.store.set_session(child_id, Some(received.to_string())) {
            warn!(child_id, error = %e, "failed to persist chat session");
        }
        self.events
            .publish(LearningEvent::SessionStarted(SessionStartedPayload {
                child_id: child_id.to_string(),
                session_id: received.to_string(),
            }));
    }

    /// Ends the conversation: the next message starts a new session.
    pub fn clear(&self, child_id: &str) -> ClientResult<()> {
        self.conversations
            .lock()
            .insert(child_id.to_string(), Arc::new(Conversation::default()));
        self.store.set_session(child_id, None)?;
        info!(child_id, "chat conversation cleared");
        Ok(())
    }

    /// Replaces the local log with the server's history for the child's
    /// session. Without a session there is nothing to load.
    pub async fn load_history(&self, child_id: &str) -> ClientResult<Vec<ChatMessage>> {
        let conversation = self.conversation(child_id);
        let _turn = conversation.send_lock.lock().await;

        let Some(session_id) = conversation.state.lock().session_id.clone() else {
            return Ok(Vec::new());
        };

        let history = self.api.chat_history(&session_id).await?;
        if history.session_id != session_id {
            warn!(
                child_id,
                session_id,
                returned = %history.session_id,
                "history for another session ignored"
            );
            return Ok(conversation.state.lock().log.messages());
        }

        let mut state = conversation.state.lock();
        state.log.replace_with_history(history.messages);
        Ok(state.log.messages())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatRole;
    use proptest::prelude::*;

    fn assistant(text: &str) -> ChatMessage {
        ChatMessage::new(ChatRole::Assistant, text)
    }

    fn contents(log: &ChatLog) -> Vec<String> {
        log.messages().into_iter().map(|m| m.content).collect()
    }

    #[test]
    fn test_reply_placed_by_send_order() {
        let mut log = ChatLog::new();
        let a = log.begin_send(ChatMessage::user("A"));
        let b = log.begin_send(ChatMessage::user("B"));

        assert!(log.complete(b, assistant("re B")));
        assert!(log.complete(a, assistant("re A")));

        assert_eq!(contents(&log), vec!["A", "re A", "B", "re B"]);
        assert_eq!(log.pending_count(), 0);
    }

    #[test]
    fn test_failure_keeps_user_message() {
        let mut log = ChatLog::new();
        let seq = log.begin_send(ChatMessage::user("hello"));
        assert!(log.fail(seq, ChatMessage::system(FAILURE_TEXT)));

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message.role, ChatRole::User);
        assert_eq!(entries[0].state, EntryState::Failed);
        assert_eq!(entries[1].message.role, ChatRole::System);
        assert_eq!(entries[1].message.content, FAILURE_TEXT);
    }

    #[test]
    fn test_settle_only_once() {
        let mut log = ChatLog::new();
        let seq = log.begin_send(ChatMessage::user("x"));
        assert!(log.complete(seq, assistant("y")));
        assert!(!log.fail(seq, ChatMessage::system(FAILURE_TEXT)));
        assert!(!log.complete(99, assistant("z")));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_pending_sends_follow_loaded_history() {
        let mut log = ChatLog::new();
        let first = log.begin_send(ChatMessage::user("new"));
        let second = log.begin_send(ChatMessage::user("newer"));
        log.replace_with_history(vec![ChatMessage::user("old"), assistant("old reply")]);
        assert_eq!(contents(&log), vec!["old", "old reply", "new", "newer"]);

        assert!(log.complete(second, assistant("re newer")));
        assert!(log.complete(first, assistant("re new")));
        assert_eq!(
            contents(&log),
            vec!["old", "old reply", "new", "re new", "newer", "re newer"]
        );
        assert_eq!(log.pending_count(), 0);
        assert_eq!((log.resolve(first), log.resolve(second)), (4, 5));
    }

    #[test]
    fn test_send_moved_twice_still_settles() {
        let mut log = ChatLog::new();
        let seq = log.begin_send(ChatMessage::user("waiting"));
        log.replace_with_history(vec![ChatMessage::user("h1")]);
        log.replace_with_history(vec![ChatMessage::user("h1"), ChatMessage::user("h2")]);
        assert_eq!(contents(&log), vec!["h1", "h2", "waiting"]);

        assert!(log.fail(seq, ChatMessage::system(FAILURE_TEXT)));
        assert_eq!(contents(&log), vec!["h1", "h2", "waiting", FAILURE_TEXT]);
        let entries = log.entries();
        assert_eq!(entries[2].seq, log.resolve(seq));
        assert_eq!(entries[2].state, EntryState::Failed);
    }

    proptest! {
        #[test]
        fn prop_log_follows_send_order(
            order in (1usize..8).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle()),
            failures in prop::collection::vec(any::<bool>(), 8),
        ) {
            let mut log = ChatLog::new();
            let seqs: Vec<u64> = (0..order.len())
                .map(|i| log.begin_send(ChatMessage::user(format!("m{i}"))))
                .collect();

            for &i in &order {
                if failures[i] {
                    log.fail(seqs[i], ChatMessage::system(FAILURE_TEXT));
                } else {
                    log.complete(seqs[i], assistant(&format!("r{i}")));
                }
            }

            let messages = log.messages();
            prop_assert_eq!(messages.len(), order.len() * 2);
            for i in 0..order.len() {
                prop_assert_eq!(&messages[2 * i].content, &format!("m{i}"));
                prop_assert_eq!(messages[2 * i].role, ChatRole::User);
                prop_assert_ne!(messages[2 * i + 1].role, ChatRole::User);
            }
        }
    }
}
