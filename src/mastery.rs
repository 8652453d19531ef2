//! Mastery state machine as observed by the client.
//!
//! The backend decides every transition. The client refuses to send attempts
//! for `locked` words, applies returned records atomically, keeps
//! `mastered` terminal with `mastered_at` pinned to its first value, and
//! invalidates the (child, domain) recommendation after each applied attempt.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::api::LearningApi;
use crate::error::{ClientError, ClientResult};
use crate::events::{
    AttemptRecordedPayload, EventBus, LearningEvent, RecommendationsInvalidatedPayload,
    WordMasteredPayload,
};
use crate::models::{ProgressOverview, ProgressStatus, RecommendedWord, WordProgress};
use crate::recommend::{RecommendationCache, RecommendationKey};

impl ProgressStatus {
    /// Transitions the client accepts from a backend response. Self loops
    /// are allowed; nothing leaves `mastered` and nothing returns to
    /// `locked` once unlocked.
    pub fn can_transition_to(self, target: ProgressStatus) -> bool {
        use ProgressStatus::*;
        matches!(
            (self, target),
            (Locked, Locked | Unlocked)
                | (Unlocked, Unlocked | InProgress | Practicing | Mastered)
                | (InProgress, InProgress | Practicing | Mastered)
                | (Practicing, InProgress | Practicing | Mastered)
                | (Mastered, Mastered)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionAnomaly {
    UnexpectedTransition {
        from: ProgressStatus,
        to: ProgressStatus,
    },
    LeftMastered {
        reported: ProgressStatus,
    },
    MasteredAtChanged,
    MasteredAtCleared,
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub record: WordProgress,
    pub previous_status: Option<ProgressStatus>,
    pub anomalies: Vec<TransitionAnomaly>,
}

impl Reconciled {
    pub fn newly_mastered(&self) -> bool {
        self.record.status == ProgressStatus::Mastered
            && self.previous_status != Some(ProgressStatus::Mastered)
    }
}

/// Merges a backend record into the previously cached one. Counters and
/// status come from `incoming`; `mastered` status and the first
/// `mastered_at` survive any later response.
pub fn reconcile(previous: Option<&WordProgress>, incoming: WordProgress) -> Reconciled {
    let mut record = incoming;
    let mut anomalies = Vec::new();
    let previous_status = previous.map(|p| p.status);

    if let Some(prev) = previous {
        if prev.status == ProgressStatus::Mastered && record.status != ProgressStatus::Mastered {
            anomalies.push(TransitionAnomaly::LeftMastered {
                reported: record.status,
            });
            record.status = ProgressStatus::Mastered;
        } else if !prev.status.can_transition_to(record.status) {
            anomalies.push(TransitionAnomaly::UnexpectedTransition {
                from: prev.status,
                to: record.status,
            });
        }

        if let Some(first) = prev.mastered_at {
            match record.mastered_at {
                None => anomalies.push(TransitionAnomaly::MasteredAtCleared),
                Some(reported) if reported != first => {
                    anomalies.push(TransitionAnomaly::MasteredAtChanged)
                }
                _ => {}
            }
            record.mastered_at = Some(first);
        }
    }

    Reconciled {
        record,
        previous_status,
        anomalies,
    }
}

// ============================================================
// ProgressCache - read-mostly WordProgress per (child, word)
// ============================================================

#[derive(Default)]
pub struct ProgressCache {
    records: Mutex<HashMap<(String, String), WordProgress>>,
}

impl ProgressCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, child_id: &str, word_id: &str) -> Option<WordProgress> {
        self.records
            .lock()
            .get(&(child_id.to_string(), word_id.to_string()))
            .cloned()
    }

    pub fn status_of(&self, child_id: &str, word_id: &str) -> Option<ProgressStatus> {
        self.get(child_id, word_id).map(|p| p.status)
    }

    /// Reconciles and replaces the cached record in one step.
    pub fn apply(&self, child_id: &str, incoming: WordProgress) -> Reconciled {
        let key = (child_id.to_string(), incoming.word_id.clone());
        let mut records = self.records.lock();
        let reconciled = reconcile(records.get(&key), incoming);
        records.insert(key, reconciled.record.clone());
        reconciled
    }

    pub fn prime(&self, child_id: &str, records: Vec<WordProgress>) -> usize {
        let mut applied = 0;
        for record in records {
            let reconciled = self.apply(child_id, record);
            if !reconciled.anomalies.is_empty() {
                debug!(
                    child_id,
                    word_id = %reconciled.record.word_id,
                    "primed progress disagreed with cache"
                );
            }
            applied += 1;
        }
        applied
    }

    pub fn for_child(&self, child_id: &str) -> Vec<WordProgress> {
        let mut out: Vec<WordProgress> = self
            .records
            .lock()
            .iter()
            .filter(|((c, _), _)| c == child_id)
            .map(|(_, p)| p.clone())
            .collect();
        out.sort_by(|a, b| a.word_id.cmp(&b.word_id));
        out
    }

    pub fn clear_child(&self, child_id: &str) {
        self.records.lock().retain(|(c, _), _| c != child_id);
    }
}

/// A word the learner may practise. Only constructible from a non-locked
/// status, so attempts on locked words cannot be expressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PracticeTarget {
    child_id: String,
    domain_id: String,
    word_id: String,
}

impl PracticeTarget {
    pub fn new(
        child_id: impl Into<String>,
        domain_id: impl Into<String>,
        word_id: impl Into<String>,
        status: ProgressStatus,
    ) -> ClientResult<Self> {
        let word_id = word_id.into();
        if !status.is_practicable() {
            return Err(ClientError::WordLocked { word_id });
        }
        Ok(Self {
            child_id: child_id.into(),
            domain_id: domain_id.into(),
            word_id,
        })
    }

    pub fn from_recommendation(
        child_id: impl Into<String>,
        domain_id: impl Into<String>,
        word: &RecommendedWord,
    ) -> ClientResult<Self> {
        Self::new(child_id, domain_id, word.word_id.clone(), word.status)
    }

    pub fn child_id(&self) -> &str {
        &self.child_id
    }

    pub fn domain_id(&self) -> &str {
        &self.domain_id
    }

    pub fn word_id(&self) -> &str {
        &self.word_id
    }
}

pub struct MasteryTracker {
    api: Arc<dyn LearningApi>,
    progress: Arc<ProgressCache>,
    recommendations: Arc<RecommendationCache>,
    overviews: Mutex<HashMap<String, ProgressOverview>>,
    events: Arc<EventBus>,
}

impl MasteryTracker {
    pub fn new(
        api: Arc<dyn LearningApi>,
        progress: Arc<ProgressCache>,
        recommendations: Arc<RecommendationCache>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            api,
            progress,
            recommendations,
            overviews: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn progress(&self) -> Arc<ProgressCache> {
        Arc::clone(&self.progress)
    }

    /// Sends one attempt. On failure nothing local changes and the error is
    /// returned for the caller to show; there is no automatic retry.
    pub async fn record_attempt(
        &self,
        target: &PracticeTarget,
        correct: bool,
    ) -> ClientResult<WordProgress> {
        let child_id = target.child_id();
        let domain_id = target.domain_id();
        let word_id = target.word_id();

        if self.progress.status_of(child_id, word_id) == Some(ProgressStatus::Locked) {
            return Err(ClientError::WordLocked {
                word_id: word_id.to_string(),
            });
        }

        let key = RecommendationKey::new(child_id, domain_id);
        let gate = self.recommendations.gate(&key);
        let _exclusive = gate.write().await;

        let returned = match self.api.record_attempt(child_id, word_id, correct).await {
            Ok(progress) => progress,
            Err(err) => {
                warn!(child_id, word_id, error = %err, "attempt not recorded");
                return Err(err);
            }
        };

        if returned.word_id != word_id {
            warn!(
                child_id,
                word_id,
                returned = %returned.word_id,
                "attempt response names a different word"
            );
        }

        let reconciled = self.progress.apply(child_id, returned);
        for anomaly in &reconciled.anomalies {
            warn!(child_id, word_id, ?anomaly, "backend progress contradicts mastery rules");
        }

        self.recommendations.invalidate(&key);
        self.overviews.lock().remove(child_id);

        let record = reconciled.record.clone();
        self.events
            .publish(LearningEvent::AttemptRecorded(AttemptRecordedPayload {
                child_id: child_id.to_string(),
                domain_id: domain_id.to_string(),
                word_id: record.word_id.clone(),
                correct,
                status: record.status,
                timestamp: Utc::now(),
            }));
        if reconciled.newly_mastered() {
            info!(child_id, word_id = %record.word_id, "word mastered");
            self.events.publish(LearningEvent::WordMastered(WordMasteredPayload {
                child_id: child_id.to_string(),
                domain_id: domain_id.to_string(),
                word_id: record.word_id.clone(),
                mastered_at: record.mastered_at,
            }));
        }
        self.events.publish(LearningEvent::RecommendationsInvalidated(
            RecommendationsInvalidatedPayload {
                child_id: child_id.to_string(),
                domain_id: domain_id.to_string(),
            },
        ));

        Ok(record)
    }

    /// Loads the child's records for a domain into the cache.
    pub async fn prime(&self, child_id: &str, domain_id: &str) -> ClientResult<usize> {
        let records = self.api.child_progress(child_id, Some(domain_id)).await?;
        Ok(self.progress.prime(child_id, records))
    }

    /// Read-through; dropped after every applied attempt for the child.
    pub async fn overview(&self, child_id: &str) -> ClientResult<ProgressOverview> {
        if let Some(cached) = self.overviews.lock().get(child_id) {
            return Ok(cached.clone());
        }
        let overview = self.api.progress_overview(child_id).await?;
        self.overviews
            .lock()
            .insert(child_id.to_string(), overview.clone());
        Ok(overview)
    }

    pub fn forget_child(&self, child_id: &str) {
        self.progress.clear_child(child_id);
        self.overviews.lock().remove(child_id);
        self.recommendations.invalidate_child(child_id);
    }
}
