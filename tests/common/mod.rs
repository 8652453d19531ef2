#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::StatusCode;

use learningtoy_client::config::Config;
use learningtoy_client::error::{ClientError, ClientResult};
use learningtoy_client::graph::{GraphEdge, GraphNode, LearningGraph};
use learningtoy_client::models::{
    AuthToken, ChatHistory, ChatMessage, ChatRequest, ChatResponse, ChatRole, Child, Credentials,
    Difficulty, Domain, NewChild, ProgressOverview, ProgressStatus, RecommendedWord, User, Word,
    WordProgress, WordTranslation,
};
use learningtoy_client::store::LocalStore;
use learningtoy_client::{ClientState, LearningApi};

pub const DOMAIN: &str = "animals";
pub const CHILD: &str = "child-1";
pub const PASSWORD: &str = "secret";

/// In-memory backend following the server's rules: a word is recommended
/// once all its prerequisites are mastered, and three attempts at 80%
/// accuracy or better master it. Calls can be scripted to fail or stall.
#[derive(Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    domains: Vec<Domain>,
    words: HashMap<String, Vec<Word>>,
    progress: HashMap<(String, String), WordProgress>,
    failures: HashMap<&'static str, usize>,
    delays: HashMap<&'static str, Duration>,
    chat_delays: HashMap<String, Duration>,
    leak_locked: bool,
    calls: Vec<&'static str>,
    chat_requests: Vec<ChatRequest>,
    sessions: HashMap<String, Vec<ChatMessage>>,
    next_session: u32,
    token: Option<String>,
    children: Vec<Child>,
    next_token: u32,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Domain where `c` needs both `a` and `b`.
    pub fn abc() -> Self {
        let api = Self::new();
        api.add_domain(
            DOMAIN,
            vec![
                word("a", DOMAIN, &[]),
                word("b", DOMAIN, &[]),
                word("c", DOMAIN, &["a", "b"]),
            ],
        );
        api
    }

    pub fn add_domain(&self, domain_id: &str, words: Vec<Word>) {
        let mut state = self.state.lock();
        state.domains.push(Domain {
            id: domain_id.to_string(),
            user_id: None,
            name: domain_id.to_string(),
            description: None,
            icon: None,
            color: None,
            is_system: true,
            word_count: words.len() as u32,
            created_at: None,
        });
        state.words.insert(domain_id.to_string(), words);
    }

    pub fn add_child(&self, child_id: &str, name: &str) {
        self.state.lock().children.push(child(child_id, name));
    }

    /// Token the client last handed over.
    pub fn token(&self) -> Option<String> {
        self.state.lock().token.clone()
    }

    /// The next `times` calls to `method` fail with a 500.
    pub fn fail_next(&self, method: &'static str, times: usize) {
        self.state.lock().failures.insert(method, times);
    }

    pub fn delay(&self, method: &'static str, delay: Duration) {
        self.state.lock().delays.insert(method, delay);
    }

    /// Stalls the chat reply for one message text.
    pub fn delay_chat(&self, message: &str, delay: Duration) {
        self.state
            .lock()
            .chat_delays
            .insert(message.to_string(), delay);
    }

    /// Makes next-words also return locked words, which the server never
    /// should.
    pub fn leak_locked(&self, leak: bool) {
        self.state.lock().leak_locked = leak;
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| **c == method)
            .count()
    }

    pub fn chat_requests(&self) -> Vec<ChatRequest> {
        self.state.lock().chat_requests.clone()
    }

    pub fn server_progress(&self, child_id: &str, word_id: &str) -> Option<WordProgress> {
        self.state
            .lock()
            .progress
            .get(&(child_id.to_string(), word_id.to_string()))
            .cloned()
    }

    async fn enter(&self, method: &'static str) -> ClientResult<()> {
        let delay = {
            let mut state = self.state.lock();
            state.calls.push(method);
            if let Some(remaining) = state.failures.get_mut(method) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(scripted_failure());
                }
            }
            state.delays.get(method).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

fn scripted_failure() -> ClientError {
    ClientError::HttpStatus {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: "scripted failure".to_string(),
    }
}

fn unauthorized() -> ClientError {
    ClientError::HttpStatus {
        status: StatusCode::UNAUTHORIZED,
        body: String::new(),
    }
}

fn not_found() -> ClientError {
    ClientError::HttpStatus {
        status: StatusCode::NOT_FOUND,
        body: String::new(),
    }
}

impl FakeState {
    fn mastered(&self, child_id: &str) -> HashSet<String> {
        self.progress
            .iter()
            .filter(|((c, _), p)| c == child_id && p.status == ProgressStatus::Mastered)
            .map(|((_, w), _)| w.clone())
            .collect()
    }

    fn status_of(&self, child_id: &str, word: &Word, mastered: &HashSet<String>) -> ProgressStatus {
        if let Some(p) = self.progress.get(&(child_id.to_string(), word.id.clone())) {
            return p.status;
        }
        if word.prerequisite_ids.iter().all(|p| mastered.contains(p)) {
            ProgressStatus::Unlocked
        } else {
            ProgressStatus::Locked
        }
    }

    fn all_words(&self) -> impl Iterator<Item = &Word> {
        self.words.values().flatten()
    }

    fn signed_in(&self) -> ClientResult<()> {
        match &self.token {
            Some(token) if token.starts_with("token-") => Ok(()),
            _ => Err(unauthorized()),
        }
    }
}

#[async_trait]
impl LearningApi for FakeApi {
    fn set_token(&self, token: Option<String>) {
        self.state.lock().token = token;
    }

    async fn login(&self, credentials: &Credentials) -> ClientResult<AuthToken> {
        self.enter("login").await?;
        if credentials.password != PASSWORD {
            return Err(unauthorized());
        }
        let mut state = self.state.lock();
        state.next_token += 1;
        Ok(AuthToken {
            access_token: format!("token-{}", state.next_token),
            token_type: "bearer".to_string(),
        })
    }

    async fn me(&self) -> ClientResult<User> {
        self.enter("me").await?;
        self.state.lock().signed_in()?;
        Ok(User {
            id: "parent-1".to_string(),
            email: "parent@example.com".to_string(),
            role: "parent".to_string(),
            created_at: None,
        })
    }

    async fn list_children(&self) -> ClientResult<Vec<Child>> {
        self.enter("list_children").await?;
        let state = self.state.lock();
        state.signed_in()?;
        Ok(state.children.clone())
    }

    async fn create_child(&self, new_child: &NewChild) -> ClientResult<Child> {
        self.enter("create_child").await?;
        let mut state = self.state.lock();
        state.signed_in()?;
        let id = format!("child-{}", state.children.len() + 1);
        let mut created = child(&id, &new_child.name);
        if let Some(language) = &new_child.preferred_language {
            created.preferred_language = language.clone();
        }
        state.children.push(created.clone());
        Ok(created)
    }

    async fn list_domains(&self, _include_system: bool) -> ClientResult<Vec<Domain>> {
        self.enter("list_domains").await?;
        Ok(self.state.lock().domains.clone())
    }

    async fn domain(&self, domain_id: &str) -> ClientResult<Domain> {
        self.enter("domain").await?;
        let state = self.state.lock();
        state
            .domains
            .iter()
            .find(|d| d.id == domain_id)
            .cloned()
            .ok_or_else(not_found)
    }

    async fn domain_graph(&self, domain_id: &str) -> ClientResult<LearningGraph> {
        self.enter("domain_graph").await?;
        let state = self.state.lock();
        let words = state.words.get(domain_id).ok_or_else(not_found)?;
        Ok(graph_of(domain_id, words))
    }

    async fn domain_words(&self, domain_id: &str) -> ClientResult<Vec<Word>> {
        self.enter("domain_words").await?;
        let state = self.state.lock();
        state.words.get(domain_id).cloned().ok_or_else(not_found)
    }

    async fn child_progress(
        &self,
        child_id: &str,
        domain_id: Option<&str>,
    ) -> ClientResult<Vec<WordProgress>> {
        self.enter("child_progress").await?;
        let state = self.state.lock();
        let in_domain: Option<HashSet<&str>> = domain_id.map(|d| {
            state
                .words
                .get(d)
                .map(|ws| ws.iter().map(|w| w.id.as_str()).collect())
                .unwrap_or_default()
        });
        Ok(state
            .progress
            .iter()
            .filter(|((c, w), _)| {
                c == child_id && in_domain.as_ref().map_or(true, |ids| ids.contains(w.as_str()))
            })
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn next_words(
        &self,
        child_id: &str,
        domain_id: &str,
        limit: usize,
    ) -> ClientResult<Vec<RecommendedWord>> {
        self.enter("next_words").await?;
        let state = self.state.lock();
        let words = state.words.get(domain_id).ok_or_else(not_found)?;
        let mastered = state.mastered(child_id);

        let mut out: Vec<RecommendedWord> = Vec::new();
        if state.leak_locked {
            out.extend(
                words
                    .iter()
                    .filter(|w| state.status_of(child_id, w, &mastered) == ProgressStatus::Locked)
                    .map(|w| recommended(w, ProgressStatus::Locked)),
            );
        }

        let mut candidates: Vec<(&Word, i32)> = words
            .iter()
            .filter(|w| !mastered.contains(&w.id))
            .filter(|w| w.prerequisite_ids.iter().all(|p| mastered.contains(p)))
            .map(|w| {
                let unlocks = words
                    .iter()
                    .filter(|other| other.prerequisite_ids.contains(&w.id))
                    .count() as i32;
                let base = match w.difficulty {
                    Difficulty::Beginner => 100,
                    Difficulty::Intermediate => 50,
                    Difficulty::Advanced => 10,
                    Difficulty::Unknown => 0,
                };
                (w, base + unlocks * 10)
            })
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1));

        out.extend(candidates.into_iter().take(limit).map(|(w, _)| {
            let status = state.status_of(child_id, w, &mastered);
            recommended(w, status)
        }));
        Ok(out)
    }

    async fn record_attempt(
        &self,
        child_id: &str,
        word_id: &str,
        correct: bool,
    ) -> ClientResult<WordProgress> {
        self.enter("record_attempt").await?;
        let mut state = self.state.lock();
        let now = Utc::now();
        let record = state
            .progress
            .entry((child_id.to_string(), word_id.to_string()))
            .or_insert_with(|| WordProgress {
                id: Some(format!("p-{child_id}-{word_id}")),
                ..WordProgress::unlocked(word_id)
            });

        record.attempts += 1;
        if correct {
            record.correct_count += 1;
            record.streak_count += 1;
        } else {
            record.streak_count = 0;
        }
        record.last_practiced_at = Some(now);

        let accuracy = record.computed_accuracy();
        record.status = if record.attempts >= 3 && accuracy >= 0.8 {
            if record.mastered_at.is_none() {
                record.mastered_at = Some(now);
            }
            ProgressStatus::Mastered
        } else if record.attempts >= 3 && accuracy >= 0.6 && record.streak_count >= 2 {
            ProgressStatus::Practicing
        } else {
            ProgressStatus::InProgress
        };
        record.accuracy = (accuracy * 100.0).round() / 100.0;
        Ok(record.clone())
    }

    async fn progress_overview(&self, child_id: &str) -> ClientResult<ProgressOverview> {
        self.enter("progress_overview").await?;
        let state = self.state.lock();
        let mastered = state.mastered(child_id);
        let mut overview = ProgressOverview::default();
        for word in state.all_words() {
            overview.total_words += 1;
            match state.status_of(child_id, word, &mastered) {
                ProgressStatus::Locked => overview.locked += 1,
                ProgressStatus::Unlocked => overview.unlocked += 1,
                ProgressStatus::InProgress => overview.in_progress += 1,
                ProgressStatus::Practicing => overview.practicing += 1,
                ProgressStatus::Mastered => overview.mastered += 1,
            }
        }
        for ((c, _), p) in &state.progress {
            if c == child_id {
                overview.total_attempts += p.attempts;
                overview.total_correct += p.correct_count;
            }
        }
        if overview.total_attempts > 0 {
            overview.accuracy =
                f64::from(overview.total_correct) / f64::from(overview.total_attempts);
        }
        Ok(overview)
    }

    async fn send_chat_message(&self, request: &ChatRequest) -> ClientResult<ChatResponse> {
        let chat_delay = {
            let mut state = self.state.lock();
            state.chat_requests.push(request.clone());
            state.chat_delays.get(&request.message).copied()
        };
        self.enter("send_chat_message").await?;
        if let Some(delay) = chat_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        let session_id = match &request.session_id {
            Some(id) => id.clone(),
            None => {
                state.next_session += 1;
                format!("session-{}", state.next_session)
            }
        };
        let reply = ChatMessage::new(ChatRole::Assistant, format!("echo: {}", request.message));
        let history = state.sessions.entry(session_id.clone()).or_default();
        history.push(ChatMessage::user(request.message.clone()));
        history.push(reply.clone());

        Ok(ChatResponse {
            session_id,
            message: reply,
        })
    }

    async fn chat_history(&self, session_id: &str) -> ClientResult<ChatHistory> {
        self.enter("chat_history").await?;
        let state = self.state.lock();
        let messages = state.sessions.get(session_id).cloned().ok_or_else(not_found)?;
        Ok(ChatHistory {
            session_id: session_id.to_string(),
            child_id: None,
            messages,
        })
    }
}

pub fn child(id: &str, name: &str) -> Child {
    Child {
        id: id.to_string(),
        user_id: Some("parent-1".to_string()),
        name: name.to_string(),
        preferred_language: "en".to_string(),
        birth_date: None,
        avatar_url: None,
        created_at: None,
    }
}

pub fn word(id: &str, domain_id: &str, prerequisites: &[&str]) -> Word {
    Word {
        id: id.to_string(),
        domain_id: domain_id.to_string(),
        difficulty: Difficulty::Beginner,
        image_url: None,
        sort_order: 0,
        translations: vec![
            translation("en", &format!("{id} (en)")),
            translation("pl", &format!("{id} (pl)")),
        ],
        prerequisite_ids: prerequisites.iter().map(|p| p.to_string()).collect(),
        created_at: None,
    }
}

fn translation(language: &str, text: &str) -> WordTranslation {
    WordTranslation {
        id: None,
        language: language.to_string(),
        text: text.to_string(),
        phonetic: None,
        example_sentence: None,
    }
}

fn recommended(word: &Word, status: ProgressStatus) -> RecommendedWord {
    RecommendedWord {
        word_id: word.id.clone(),
        word_text: word.labels(),
        status,
        difficulty: word.difficulty,
    }
}

/// Levels by longest prerequisite chain.
pub fn graph_of(domain_id: &str, words: &[Word]) -> LearningGraph {
    let mut level: HashMap<&str, usize> = HashMap::new();
    while level.len() < words.len() {
        let before = level.len();
        for w in words {
            if level.contains_key(w.id.as_str()) {
                continue;
            }
            let prereq_levels: Option<Vec<usize>> = w
                .prerequisite_ids
                .iter()
                .map(|p| level.get(p.as_str()).copied())
                .collect();
            if let Some(levels) = prereq_levels {
                level.insert(&w.id, levels.into_iter().map(|l| l + 1).max().unwrap_or(0));
            }
        }
        assert!(level.len() > before, "prerequisite cycle in test domain");
    }

    let depth = level.values().copied().max().map_or(0, |m| m + 1);
    let mut levels = vec![Vec::new(); depth];
    for w in words {
        levels[level[w.id.as_str()]].push(w.id.clone());
    }

    LearningGraph {
        domain_id: domain_id.to_string(),
        domain_name: domain_id.to_string(),
        nodes: words
            .iter()
            .map(|w| GraphNode {
                id: w.id.clone(),
                domain_id: Some(domain_id.to_string()),
                difficulty: w.difficulty,
                image_url: None,
                translations: w.labels(),
                sort_order: w.sort_order,
            })
            .collect(),
        edges: words
            .iter()
            .flat_map(|w| {
                w.prerequisite_ids.iter().map(|p| GraphEdge {
                    from: p.clone(),
                    to: w.id.clone(),
                })
            })
            .collect(),
        levels,
    }
}

pub fn client(api: Arc<FakeApi>) -> ClientState {
    client_with_store(api, Arc::new(LocalStore::in_memory()))
}

pub fn client_with_store(api: Arc<FakeApi>, store: Arc<LocalStore>) -> ClientState {
    ClientState::new(&Config::default(), api, store)
}
