//! Selection orchestrator: which child, which domain, which word is on
//! screen, and whether its translation has been revealed.
//!
//! [`SelectionState`] is a plain state container. Every result that comes
//! back from the network is applied through a [`ContextToken`] taken before
//! the request; if the child or domain changed meanwhile the result is
//! discarded.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::LearningApi;
use crate::error::{ClientError, ClientResult};
use crate::mastery::{MasteryTracker, PracticeTarget};
use crate::models::{Child, ProgressStatus, RecommendedWord, Word, WordProgress};
use crate::recommend::RecommendationClient;
use crate::store::LocalStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnerLanguages {
    pub prompt: String,
    /// Tried in order when revealing.
    pub targets: Vec<String>,
}

impl Default for LearnerLanguages {
    fn default() -> Self {
        Self {
            prompt: "en".to_string(),
            targets: vec!["pl".to_string(), "es".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextToken {
    context: u64,
    child_id: String,
    domain_id: Option<String>,
}

impl ContextToken {
    pub fn child_id(&self) -> &str {
        &self.child_id
    }

    pub fn domain_id(&self) -> Option<&str> {
        self.domain_id.as_deref()
    }
}

/// A word paired with progress for the same word. Never holds a `locked`
/// record, so whatever is bound can be practised.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundWord {
    word: Word,
    progress: WordProgress,
}

impl BoundWord {
    pub fn new(word: Word, progress: WordProgress) -> Option<Self> {
        if word.id != progress.word_id || !progress.status.is_practicable() {
            return None;
        }
        Some(Self { word, progress })
    }

    pub fn word(&self) -> &Word {
        &self.word
    }

    pub fn progress(&self) -> &WordProgress {
        &self.progress
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionNotice {
    NoFurtherWords,
    Error {
        code: String,
        message: String,
        retryable: bool,
    },
}

impl SelectionNotice {
    pub fn from_error(err: &ClientError) -> Self {
        SelectionNotice::Error {
            code: err.code().to_string(),
            message: err.user_message(),
            retryable: err.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionView {
    pub child_id: Option<String>,
    pub domain_id: Option<String>,
    pub word: Option<Word>,
    pub progress: Option<WordProgress>,
    pub prompt: Option<String>,
    /// Only present once revealed.
    pub translation: Option<String>,
    pub revealed: bool,
    pub loading: bool,
    pub notice: Option<SelectionNotice>,
}

impl SelectionView {
    pub fn status_label(&self) -> Option<&'static str> {
        self.progress.as_ref().map(|p| p.status.label())
    }
}

// ============================================================
// SelectionState - pure transitions
// ============================================================

#[derive(Debug, Default)]
pub struct SelectionState {
    context: u64,
    child_id: Option<String>,
    domain_id: Option<String>,
    words: Vec<Word>,
    current: Option<BoundWord>,
    revealed: bool,
    loading: bool,
    notice: Option<SelectionNotice>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset_domain_content(&mut self) {
        self.words.clear();
        self.current = None;
        self.revealed = false;
        self.loading = false;
        self.notice = None;
    }

    /// Switching child also drops the domain.
    pub fn select_child(&mut self, child_id: &str) -> ContextToken {
        if self.child_id.as_deref() != Some(child_id) {
            self.context += 1;
            self.child_id = Some(child_id.to_string());
            self.domain_id = None;
            self.reset_domain_content();
        }
        self.token_for_child(child_id)
    }

    pub fn clear_child(&mut self) {
        self.context += 1;
        self.child_id = None;
        self.domain_id = None;
        self.reset_domain_content();
    }

    pub fn select_domain(&mut self, domain_id: &str) -> ClientResult<ContextToken> {
        let child_id = self.child_id.clone().ok_or(ClientError::NoActiveChild)?;
        self.context += 1;
        self.domain_id = Some(domain_id.to_string());
        self.reset_domain_content();
        self.loading = true;
        Ok(self.token_for_child(&child_id))
    }

    fn token_for_child(&self, child_id: &str) -> ContextToken {
        ContextToken {
            context: self.context,
            child_id: child_id.to_string(),
            domain_id: self.domain_id.clone(),
        }
    }

    pub fn token(&self) -> Option<ContextToken> {
        self.child_id.as_deref().map(|c| self.token_for_child(c))
    }

    pub fn is_current(&self, token: &ContextToken) -> bool {
        token.context == self.context
            && self.child_id.as_deref() == Some(token.child_id.as_str())
            && self.domain_id == token.domain_id
    }

    pub fn set_words(&mut self, token: &ContextToken, words: Vec<Word>) -> bool {
        if !self.is_current(token) {
            return false;
        }
        self.words = words;
        true
    }

    pub fn word(&self, word_id: &str) -> Option<&Word> {
        self.words.iter().find(|w| w.id == word_id)
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    pub fn current(&self) -> Option<&BoundWord> {
        self.current.as_ref()
    }

    /// Puts a word on screen. Rebinding the word already shown keeps the
    /// reveal; a different word starts hidden.
    pub fn bind(&mut self, token: &ContextToken, bound: BoundWord) -> bool {
        if !self.is_current(token) {
            return false;
        }
        let same_word = self
            .current
            .as_ref()
            .is_some_and(|current| current.word.id == bound.word.id);
        if !same_word {
            self.revealed = false;
        }
        self.current = Some(bound);
        self.loading = false;
        self.notice = None;
        true
    }

    /// Replaces the bound word's progress after an attempt, if that word is
    /// still on screen.
    pub fn update_bound_progress(&mut self, token: &ContextToken, progress: WordProgress) -> bool {
        if !self.is_current(token) {
            return false;
        }
        match &mut self.current {
            Some(bound) if bound.word.id == progress.word_id => {
                bound.progress = progress;
                true
            }
            _ => false,
        }
    }

    pub fn exhaust(&mut self, token: &ContextToken) -> bool {
        if !self.is_current(token) {
            return false;
        }
        self.current = None;
        self.revealed = false;
        self.loading = false;
        self.notice = Some(SelectionNotice::NoFurtherWords);
        true
    }

    /// Records a failure without touching what is on screen.
    pub fn fail(&mut self, token: &ContextToken, err: &ClientError) -> bool {
        if !self.is_current(token) {
            return false;
        }
        self.loading = false;
        self.notice = Some(SelectionNotice::from_error(err));
        true
    }

    pub fn set_loading(&mut self, token: &ContextToken) -> bool {
        if !self.is_current(token) {
            return false;
        }
        self.loading = true;
        true
    }

    /// One-way until a different word is bound. False when nothing is on
    /// screen.
    pub fn reveal(&mut self) -> bool {
        if self.current.is_none() {
            return false;
        }
        self.revealed = true;
        true
    }

    pub fn is_revealed(&self) -> bool {
        self.revealed
    }

    pub fn view(&self, languages: &LearnerLanguages) -> SelectionView {
        let word = self.current.as_ref().map(|b| b.word.clone());
        let prompt = word.as_ref().and_then(|w| {
            w.translation(&languages.prompt)
                .or_else(|| w.translations.first())
                .map(|t| t.text.clone())
        });
        let translation = if self.revealed {
            let targets: Vec<&str> = languages.targets.iter().map(String::as_str).collect();
            word.as_ref()
                .and_then(|w| w.first_translation(&targets))
                .map(|t| t.text.clone())
        } else {
            None
        };

        SelectionView {
            child_id: self.child_id.clone(),
            domain_id: self.domain_id.clone(),
            progress: self.current.as_ref().map(|b| b.progress.clone()),
            word,
            prompt,
            translation,
            revealed: self.revealed,
            loading: self.loading,
            notice: self.notice.clone(),
        }
    }
}

pub struct SelectionOrchestrator {
    api: Arc<dyn LearningApi>,
    recommendations: Arc<RecommendationClient>,
    mastery: Arc<MasteryTracker>,
    store: Arc<LocalStore>,
    languages: LearnerLanguages,
    state: Mutex<SelectionState>,
    view_tx: watch::Sender<SelectionView>,
}

impl SelectionOrchestrator {
    /// Restores the persisted active child, if any.
    pub fn new(
        api: Arc<dyn LearningApi>,
        recommendations: Arc<RecommendationClient>,
        mastery: Arc<MasteryTracker>,
        store: Arc<LocalStore>,
        languages: LearnerLanguages,
    ) -> Self {
        let mut state = SelectionState::new();
        if let Some(child_id) = store.active_child_id() {
            state.select_child(&child_id);
        }
        let (view_tx, _) = watch::channel(state.view(&languages));
        Self {
            api,
            recommendations,
            mastery,
            store,
            languages,
            state: Mutex::new(state),
            view_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SelectionView> {
        self.view_tx.subscribe()
    }

    pub fn view(&self) -> SelectionView {
        self.state.lock().view(&self.languages)
    }

    fn publish(&self) {
        let view = self.view();
        self.view_tx.send_replace(view);
    }

    fn current_token(&self) -> ClientResult<ContextToken> {
        self.state.lock().token().ok_or(ClientError::NoActiveChild)
    }

    /// Persists the choice first; if the store write fails nothing
    /// switches.
    pub fn select_child(&self, child_id: &str) -> ClientResult<()> {
        self.store.set_active_child_id(Some(child_id.to_string()))?;
        self.state.lock().select_child(child_id);
        self.publish();
        info!(child_id, "active child selected");
        Ok(())
    }

    /// Forgets the active child, here and in the store.
    pub fn clear_child(&self) -> ClientResult<()> {
        self.store.set_active_child_id(None)?;
        self.state.lock().clear_child();
        self.publish();
        Ok(())
    }

    /// Keeps the active child when it is still on the account, otherwise
    /// falls back to the first child listed. `None` when the account has no
    /// children.
    pub fn select_default_child(&self, children: &[Child]) -> ClientResult<Option<String>> {
        let active = self.state.lock().token().map(|t| t.child_id().to_string());
        let chosen = active
            .filter(|id| children.iter().any(|c| &c.id == id))
            .or_else(|| children.first().map(|c| c.id.clone()));

        match chosen {
            Some(child_id) => {
                self.select_child(&child_id)?;
                Ok(Some(child_id))
            }
            None => {
                debug!("account has no children");
                Ok(None)
            }
        }
    }

    /// Words for the domain, then the recommended next word, bound together.
    pub async fn load_domain(&self, domain_id: &str) -> ClientResult<SelectionView> {
        let token = self.state.lock().select_domain(domain_id)?;
        self.publish();
        let child_id = token.child_id().to_string();

        let words = match self.api.domain_words(domain_id).await {
            Ok(words) => words,
            Err(err) => return Err(self.absorb_failure(&token, err)),
        };
        if !self.state.lock().set_words(&token, words) {
            debug!(child_id, domain_id, "word list for a left domain discarded");
            return Err(ClientError::Superseded);
        }

        if let Err(err) = self.mastery.prime(&child_id, domain_id).await {
            warn!(child_id, domain_id, error = %err, "progress not primed");
        }

        self.bind_next(&token).await?;
        Ok(self.view())
    }

    /// Re-reads the recommendation for the current domain.
    pub async fn refresh(&self) -> ClientResult<SelectionView> {
        let token = self.current_token()?;
        if token.domain_id().is_none() {
            return Err(ClientError::NoActiveDomain);
        }
        if self.state.lock().set_loading(&token) {
            self.publish();
        }
        self.bind_next(&token).await?;
        Ok(self.view())
    }

    /// Returns the revealed translation, if the word has one in a target
    /// language.
    pub fn reveal_translation(&self) -> ClientResult<Option<String>> {
        let view = {
            let mut state = self.state.lock();
            if !state.reveal() {
                return Err(ClientError::NoCurrentWord);
            }
            state.view(&self.languages)
        };
        let translation = view.translation.clone();
        self.view_tx.send_replace(view);
        Ok(translation)
    }

    /// Records the learner's judgement on the bound word, then moves on to
    /// the next recommendation. On failure the bound word and its progress
    /// stay as they were and a retryable notice is shown.
    pub async fn record_attempt(&self, correct: bool) -> ClientResult<WordProgress> {
        let (token, target) = {
            let state = self.state.lock();
            let token = state.token().ok_or(ClientError::NoActiveChild)?;
            let domain_id = token.domain_id().ok_or(ClientError::NoActiveDomain)?;
            let bound = state.current().ok_or(ClientError::NoCurrentWord)?;
            let target = PracticeTarget::new(
                token.child_id(),
                domain_id,
                bound.word().id.clone(),
                bound.progress().status,
            )?;
            (token, target)
        };

        let progress = match self.mastery.record_attempt(&target, correct).await {
            Ok(progress) => progress,
            Err(err) => return Err(self.absorb_failure(&token, err)),
        };

        if !self
            .state
            .lock()
            .update_bound_progress(&token, progress.clone())
        {
            debug!(word_id = target.word_id(), "attempt applied after selection moved on");
            return Ok(progress);
        }
        self.publish();

        if let Err(err) = self.bind_next(&token).await {
            debug!(error = %err, "next word not loaded after attempt");
        }
        Ok(progress)
    }

    async fn bind_next(&self, token: &ContextToken) -> ClientResult<()> {
        let child_id = token.child_id();
        let domain_id = token.domain_id().ok_or(ClientError::NoActiveDomain)?;
        let limit = self.recommendations.default_limit();

        let recommendation = match self
            .recommendations
            .next_words(child_id, domain_id, limit)
            .await
        {
            Ok(recommendation) => recommendation,
            Err(err) => return Err(self.absorb_failure(token, err)),
        };

        let bound = {
            let state = self.state.lock();
            if !state.is_current(token) {
                debug!(child_id, domain_id, "recommendation for a left context discarded");
                return Err(ClientError::Superseded);
            }
            recommendation
                .words
                .iter()
                .find_map(|candidate| self.pair(&state, child_id, candidate))
        };

        let applied = match bound {
            Some(bound) => {
                debug!(child_id, domain_id, word_id = %bound.word().id, "word bound");
                self.state.lock().bind(token, bound)
            }
            None => {
                info!(child_id, domain_id, "no further words");
                self.state.lock().exhaust(token)
            }
        };
        if !applied {
            return Err(ClientError::Superseded);
        }
        self.publish();
        Ok(())
    }

    /// Pairs a recommended entry with its word from the domain list. Entries
    /// naming a word the list does not have are skipped.
    fn pair(
        &self,
        state: &SelectionState,
        child_id: &str,
        candidate: &RecommendedWord,
    ) -> Option<BoundWord> {
        let Some(word) = state.word(&candidate.word_id) else {
            warn!(
                child_id,
                word_id = %candidate.word_id,
                "recommended word missing from domain word list"
            );
            return None;
        };

        let progress_cache = self.mastery.progress();
        let progress = match progress_cache.get(child_id, &candidate.word_id) {
            Some(cached) if cached.status == ProgressStatus::Locked => {
                let unlocked = WordProgress {
                    status: candidate.status,
                    ..cached
                };
                progress_cache.apply(child_id, unlocked).record
            }
            Some(cached) => cached,
            None => WordProgress {
                status: candidate.status,
                ..WordProgress::unlocked(candidate.word_id.clone())
            },
        };

        BoundWord::new(word.clone(), progress)
    }

    fn absorb_failure(&self, token: &ContextToken, err: ClientError) -> ClientError {
        if matches!(err, ClientError::Superseded) {
            return err;
        }
        warn!(
            child_id = token.child_id(),
            domain_id = ?token.domain_id(),
            code = err.code(),
            error = %err,
            "selection step failed"
        );
        if self.state.lock().fail(token, &err) {
            self.publish();
            err
        } else {
            ClientError::Superseded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WordTranslation;

    fn word(id: &str) -> Word {
        Word {
            id: id.into(),
            domain_id: "d1".into(),
            difficulty: Default::default(),
            image_url: None,
            sort_order: 0,
            translations: vec![
                WordTranslation {
                    id: None,
                    language: "en".into(),
                    text: format!("{id}-en"),
                    phonetic: None,
                    example_sentence: None,
                },
                WordTranslation {
                    id: None,
                    language: "es".into(),
                    text: format!("{id}-es"),
                    phonetic: None,
                    example_sentence: None,
                },
            ],
            prerequisite_ids: vec![],
            created_at: None,
        }
    }

    fn bound(id: &str) -> BoundWord {
        BoundWord::new(word(id), WordProgress::unlocked(id)).unwrap()
    }

    fn with_domain() -> (SelectionState, ContextToken) {
        let mut state = SelectionState::new();
        state.select_child("c1");
        let token = state.select_domain("d1").unwrap();
        (state, token)
    }

    #[test]
    fn test_bound_word_rejects_mismatch_and_locked() {
        assert!(BoundWord::new(word("a"), WordProgress::unlocked("b")).is_none());
        let locked = WordProgress {
            status: ProgressStatus::Locked,
            ..WordProgress::unlocked("a")
        };
        assert!(BoundWord::new(word("a"), locked).is_none());
    }

    #[test]
    fn test_domain_requires_child() {
        let mut state = SelectionState::new();
        assert!(matches!(
            state.select_domain("d1"),
            Err(ClientError::NoActiveChild)
        ));
    }

    #[test]
    fn test_new_word_resets_reveal() {
        let (mut state, token) = with_domain();
        assert!(state.bind(&token, bound("a")));
        assert!(state.reveal());
        assert!(state.is_revealed());

        assert!(state.bind(&token, bound("b")));
        assert!(!state.is_revealed());
    }

    #[test]
    fn test_same_word_rebind_keeps_reveal() {
        let (mut state, token) = with_domain();
        state.bind(&token, bound("a"));
        state.reveal();

        let attempted = WordProgress {
            status: ProgressStatus::InProgress,
            attempts: 1,
            ..WordProgress::unlocked("a")
        };
        let rebound = BoundWord::new(word("a"), attempted).unwrap();
        assert!(state.bind(&token, rebound));
        assert!(state.is_revealed());
        assert_eq!(state.current().unwrap().progress().attempts, 1);
    }

    #[test]
    fn test_reveal_is_one_way_until_rebind() {
        let (mut state, token) = with_domain();
        assert!(!state.reveal());
        state.bind(&token, bound("a"));
        state.reveal();
        let attempted = WordProgress {
            status: ProgressStatus::InProgress,
            ..WordProgress::unlocked("a")
        };
        assert!(state.update_bound_progress(&token, attempted));
        assert!(state.is_revealed());
    }

    #[test]
    fn test_stale_token_is_ignored() {
        let (mut state, old) = with_domain();
        let fresh = state.select_domain("d2").unwrap();

        assert!(!state.set_words(&old, vec![word("a")]));
        assert!(!state.bind(&old, bound("a")));
        assert!(state.current().is_none());
        assert!(state.bind(&fresh, bound("z")));
    }

    #[test]
    fn test_child_switch_drops_domain() {
        let (mut state, token) = with_domain();
        state.bind(&token, bound("a"));
        let next = state.select_child("c2");
        assert!(next.domain_id().is_none());
        assert!(state.current().is_none());
        assert!(!state.is_current(&token));
    }

    #[test]
    fn test_clear_child_invalidates_tokens() {
        let (mut state, token) = with_domain();
        state.bind(&token, bound("a"));
        state.clear_child();
        assert!(state.token().is_none());
        assert!(!state.is_current(&token));
        assert!(state.view(&LearnerLanguages::default()).word.is_none());
    }

    #[test]
    fn test_progress_update_only_for_bound_word() {
        let (mut state, token) = with_domain();
        state.bind(&token, bound("a"));
        assert!(!state.update_bound_progress(&token, WordProgress::unlocked("b")));
        assert_eq!(state.current().unwrap().progress().word_id, "a");
    }

    #[test]
    fn test_view_hides_translation_until_revealed() {
        let (mut state, token) = with_domain();
        let languages = LearnerLanguages::default();
        state.bind(&token, bound("a"));

        let view = state.view(&languages);
        assert_eq!(view.prompt.as_deref(), Some("a-en"));
        assert!(view.translation.is_none());
        assert_eq!(view.status_label(), Some("unlocked"));

        state.reveal();
        // no Polish text, falls back to Spanish
        assert_eq!(state.view(&languages).translation.as_deref(), Some("a-es"));
    }

    #[test]
    fn test_exhaust_shows_no_further_words() {
        let (mut state, token) = with_domain();
        state.bind(&token, bound("a"));
        assert!(state.exhaust(&token));
        let view = state.view(&LearnerLanguages::default());
        assert!(view.word.is_none());
        assert_eq!(view.notice, Some(SelectionNotice::NoFurtherWords));
    }

    #[test]
    fn test_failure_keeps_bound_word() {
        let (mut state, token) = with_domain();
        state.bind(&token, bound("a"));
        let err = ClientError::HttpStatus {
            status: reqwest::StatusCode::BAD_GATEWAY,
            body: String::new(),
        };
        assert!(state.fail(&token, &err));
        let view = state.view(&LearnerLanguages::default());
        assert_eq!(view.word.unwrap().id, "a");
        assert!(matches!(
            view.notice,
            Some(SelectionNotice::Error { retryable: true, .. })
        ));
    }
}
