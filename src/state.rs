use std::sync::Arc;
use std::time::Instant;

use crate::account::AccountClient;
use crate::api::LearningApi;
use crate::config::Config;
use crate::events::EventBus;
use crate::graph::GraphCatalog;
use crate::mastery::{MasteryTracker, ProgressCache};
use crate::recommend::{RecommendationCache, RecommendationClient};
use crate::selection::{LearnerLanguages, SelectionOrchestrator};
use crate::session::ChatSessionClient;
use crate::store::LocalStore;

/// Every client component, wired to one backend and one local store.
/// Cloning shares the components.
#[derive(Clone)]
pub struct ClientState {
    started_at: Instant,
    api: Arc<dyn LearningApi>,
    store: Arc<LocalStore>,
    events: Arc<EventBus>,
    graphs: Arc<GraphCatalog>,
    recommendations: Arc<RecommendationClient>,
    mastery: Arc<MasteryTracker>,
    chat: Arc<ChatSessionClient>,
    selection: Arc<SelectionOrchestrator>,
    account: Arc<AccountClient>,
}

impl ClientState {
    pub fn new(config: &Config, api: Arc<dyn LearningApi>, store: Arc<LocalStore>) -> Self {
        Self::with_languages(config, api, store, LearnerLanguages::default())
    }

    pub fn with_languages(
        config: &Config,
        api: Arc<dyn LearningApi>,
        store: Arc<LocalStore>,
        languages: LearnerLanguages,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let recommendation_cache = Arc::new(RecommendationCache::new());
        let progress = Arc::new(ProgressCache::new());

        let recommendations = Arc::new(RecommendationClient::new(
            Arc::clone(&api),
            Arc::clone(&recommendation_cache),
            config.next_words_limit,
        ));
        let mastery = Arc::new(MasteryTracker::new(
            Arc::clone(&api),
            progress,
            recommendation_cache,
            Arc::clone(&events),
        ));
        let chat = Arc::new(ChatSessionClient::new(
            Arc::clone(&api),
            Arc::clone(&store),
            Arc::clone(&events),
        ));
        let selection = Arc::new(SelectionOrchestrator::new(
            Arc::clone(&api),
            Arc::clone(&recommendations),
            Arc::clone(&mastery),
            Arc::clone(&store),
            languages,
        ));

        let account = Arc::new(AccountClient::new(
            Arc::clone(&api),
            Arc::clone(&store),
            Arc::clone(&selection),
        ));

        Self {
            started_at: Instant::now(),
            graphs: Arc::new(GraphCatalog::new(Arc::clone(&api))),
            api,
            store,
            events,
            recommendations,
            mastery,
            chat,
            selection,
            account,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn api(&self) -> Arc<dyn LearningApi> {
        Arc::clone(&self.api)
    }

    pub fn store(&self) -> Arc<LocalStore> {
        Arc::clone(&self.store)
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    pub fn graphs(&self) -> Arc<GraphCatalog> {
        Arc::clone(&self.graphs)
    }

    pub fn recommendations(&self) -> Arc<RecommendationClient> {
        Arc::clone(&self.recommendations)
    }

    pub fn mastery(&self) -> Arc<MasteryTracker> {
        Arc::clone(&self.mastery)
    }

    pub fn chat(&self) -> Arc<ChatSessionClient> {
        Arc::clone(&self.chat)
    }

    pub fn selection(&self) -> Arc<SelectionOrchestrator> {
        Arc::clone(&self.selection)
    }

    pub fn account(&self) -> Arc<AccountClient> {
        Arc::clone(&self.account)
    }
}
