//! Next-word recommendations.
//!
//! The ranking is the backend's; the client only enforces two things: a
//! `locked` word is never handed out, and a cached ranking never survives a
//! mastery-changing event for the same (child, domain).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{debug, warn};

use crate::api::LearningApi;
use crate::error::{ClientError, ClientResult};
use crate::models::{ProgressStatus, RecommendedWord};

const MAX_STALE_REFETCHES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecommendationKey {
    pub child_id: String,
    pub domain_id: String,
}

impl RecommendationKey {
    pub fn new(child_id: impl Into<String>, domain_id: impl Into<String>) -> Self {
        Self {
            child_id: child_id.into(),
            domain_id: domain_id.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recommendation {
    pub words: Vec<RecommendedWord>,
    /// Entries the backend returned that could not be shown.
    pub rejected: usize,
}

impl Recommendation {
    pub fn first(&self) -> Option<&RecommendedWord> {
        self.words.first()
    }

    /// "No further words" for the learner.
    pub fn is_exhausted(&self) -> bool {
        self.words.is_empty()
    }

    fn truncated(&self, limit: usize) -> Self {
        Self {
            words: self.words.iter().take(limit).cloned().collect(),
            rejected: self.rejected,
        }
    }
}

/// Drops `locked` entries and repeated word ids, keeping backend order.
pub fn filter_presentable(words: Vec<RecommendedWord>) -> Recommendation {
    let total = words.len();
    let mut seen = HashSet::new();
    let words: Vec<RecommendedWord> = words
        .into_iter()
        .filter(|w| w.status != ProgressStatus::Locked)
        .filter(|w| seen.insert(w.word_id.clone()))
        .collect();
    Recommendation {
        rejected: total - words.len(),
        words,
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    cached: Option<(usize, Recommendation)>,
}

/// Per (child, domain) cache of rankings plus the ordering gate between
/// attempts and refetches. Attempts hold the gate exclusively until their
/// response is applied; fetches hold it shared.
#[derive(Default)]
pub struct RecommendationCache {
    slots: Mutex<HashMap<RecommendationKey, Slot>>,
    gates: Mutex<HashMap<RecommendationKey, Arc<AsyncRwLock<()>>>>,
}

impl RecommendationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gate(&self, key: &RecommendationKey) -> Arc<AsyncRwLock<()>> {
        Arc::clone(self.gates.lock().entry(key.clone()).or_default())
    }

    pub fn generation(&self, key: &RecommendationKey) -> u64 {
        self.slots.lock().get(key).map_or(0, |s| s.generation)
    }

    /// Cached ranking if it was fetched with at least `limit` entries, or if
    /// the backend had fewer than it was asked for.
    pub fn cached(&self, key: &RecommendationKey, limit: usize) -> Option<Recommendation> {
        let slots = self.slots.lock();
        let (cached_limit, rec) = slots.get(key)?.cached.as_ref()?;
        if *cached_limit >= limit || rec.words.len() + rec.rejected < *cached_limit {
            Some(rec.truncated(limit))
        } else {
            None
        }
    }

    /// Stores a ranking fetched at `generation`. Returns false, storing
    /// nothing, when the slot was invalidated in the meantime.
    pub fn store(
        &self,
        key: &RecommendationKey,
        generation: u64,
        limit: usize,
        recommendation: Recommendation,
    ) -> bool {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.clone()).or_default();
        if slot.generation != generation {
            return false;
        }
        slot.cached = Some((limit, recommendation));
        true
    }

    pub fn invalidate(&self, key: &RecommendationKey) {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.clone()).or_default();
        slot.generation += 1;
        slot.cached = None;
        debug!(
            child_id = %key.child_id,
            domain_id = %key.domain_id,
            generation = slot.generation,
            "recommendations invalidated"
        );
    }

    pub fn invalidate_child(&self, child_id: &str) {
        let mut slots = self.slots.lock();
        for (key, slot) in slots.iter_mut() {
            if key.child_id == child_id {
                slot.generation += 1;
                slot.cached = None;
            }
        }
    }
}

pub struct RecommendationClient {
    api: Arc<dyn LearningApi>,
    cache: Arc<RecommendationCache>,
    default_limit: usize,
}

impl RecommendationClient {
    pub fn new(
        api: Arc<dyn LearningApi>,
        cache: Arc<RecommendationCache>,
        default_limit: usize,
    ) -> Self {
        Self {
            api,
            cache,
            default_limit: default_limit.max(1),
        }
    }

    pub fn cache(&self) -> Arc<RecommendationCache> {
        Arc::clone(&self.cache)
    }

    pub fn default_limit(&self) -> usize {
        self.default_limit
    }

    /// Best-first practicable words. Waits for any in-flight attempt on the
    /// same (child, domain) to be applied before reading or fetching.
    pub async fn next_words(
        &self,
        child_id: &str,
        domain_id: &str,
        limit: usize,
    ) -> ClientResult<Recommendation> {
        let limit = limit.max(1);
        let key = RecommendationKey::new(child_id, domain_id);
        let gate = self.cache.gate(&key);

        for _ in 0..MAX_STALE_REFETCHES {
            let _shared = gate.read().await;

            if let Some(hit) = self.cache.cached(&key, limit) {
                return Ok(hit);
            }

            let generation = self.cache.generation(&key);
            let fetched = self.api.next_words(child_id, domain_id, limit).await?;
            let recommendation = filter_presentable(fetched);

            if recommendation.rejected > 0 {
                warn!(
                    child_id,
                    domain_id,
                    rejected = recommendation.rejected,
                    "backend recommended locked or repeated words, dropped"
                );
            }

            if self.cache.store(&key, generation, limit, recommendation.clone()) {
                return Ok(recommendation);
            }

            debug!(child_id, domain_id, "discarding recommendation fetched before invalidation");
        }

        Err(ClientError::Superseded)
    }

    pub async fn next_word(
        &self,
        child_id: &str,
        domain_id: &str,
    ) -> ClientResult<Option<RecommendedWord>> {
        let recommendation = self.next_words(child_id, domain_id, 1).await?;
        Ok(recommendation.words.into_iter().next())
    }

    pub fn invalidate(&self, child_id: &str, domain_id: &str) {
        self.cache
            .invalidate(&RecommendationKey::new(child_id, domain_id));
    }
}
