use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{ClientError, ClientResult};
use crate::graph::LearningGraph;
use crate::models::{
    AuthToken, ChatHistory, ChatRequest, ChatResponse, Child, Credentials, Domain, NewChild,
    NextWordsResponse, ProgressOverview, RecommendedWord, User, Word, WordProgress,
};

/// The backend as seen by the client. Every call is a single request with no
/// automatic retry; failures surface as retryable [`ClientError`]s.
#[async_trait]
pub trait LearningApi: Send + Sync {
    /// Bearer token for later calls. `None` signs out.
    fn set_token(&self, token: Option<String>);

    async fn login(&self, credentials: &Credentials) -> ClientResult<AuthToken>;

    async fn me(&self) -> ClientResult<User>;

    async fn list_children(&self) -> ClientResult<Vec<Child>>;

    async fn create_child(&self, child: &NewChild) -> ClientResult<Child>;

    async fn list_domains(&self, include_system: bool) -> ClientResult<Vec<Domain>>;

    async fn domain(&self, domain_id: &str) -> ClientResult<Domain>;

    async fn domain_graph(&self, domain_id: &str) -> ClientResult<LearningGraph>;

    async fn domain_words(&self, domain_id: &str) -> ClientResult<Vec<Word>>;

    async fn child_progress(
        &self,
        child_id: &str,
        domain_id: Option<&str>,
    ) -> ClientResult<Vec<WordProgress>>;

    async fn next_words(
        &self,
        child_id: &str,
        domain_id: &str,
        limit: usize,
    ) -> ClientResult<Vec<RecommendedWord>>;

    async fn record_attempt(
        &self,
        child_id: &str,
        word_id: &str,
        correct: bool,
    ) -> ClientResult<WordProgress>;

    async fn progress_overview(&self, child_id: &str) -> ClientResult<ProgressOverview>;

    async fn send_chat_message(&self, request: &ChatRequest) -> ClientResult<ChatResponse>;

    async fn chat_history(&self, session_id: &str) -> ClientResult<ChatHistory>;
}

#[derive(Serialize)]
struct AttemptBody {
    correct: bool,
}

pub struct HttpLearningApi {
    base_url: String,
    client: Client,
    token: RwLock<Option<String>>,
}

impl HttpLearningApi {
    pub fn new(config: &Config) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                warn!(error = %e, "HTTP client could not be built");
                ClientError::Request(e)
            })?;

        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            client,
            token: RwLock::new(config.api_token.clone()),
        })
    }

    pub fn shared(config: &Config) -> ClientResult<Arc<dyn LearningApi>> {
        Ok(Arc::new(Self::new(config)?))
    }

    pub fn has_token(&self) -> bool {
        self.token.read().is_some()
    }

    fn url(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        for segment in segments {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.token.read().as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T>(&self, builder: RequestBuilder) -> ClientResult<T>
    where
        T: DeserializeOwned,
    {
        let resp = self.authorize(builder).send().await.map_err(|e| {
            warn!(error = %e, "backend request failed");
            ClientError::Request(e)
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, "backend returned error status");
            return Err(ClientError::HttpStatus { status, body });
        }

        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            debug!(body = %String::from_utf8_lossy(&bytes), "undecodable backend response");
            ClientError::Json(e)
        })
    }

    async fn get<T>(&self, url: String) -> ClientResult<T>
    where
        T: DeserializeOwned,
    {
        self.send(self.client.get(url)).await
    }
}

#[async_trait]
impl LearningApi for HttpLearningApi {
    fn set_token(&self, token: Option<String>) {
        *self.token.write() = token.filter(|t| !t.trim().is_empty());
    }

    async fn login(&self, credentials: &Credentials) -> ClientResult<AuthToken> {
        let builder = self.client.post(self.url(&["auth", "login"])).json(credentials);
        self.send(builder).await
    }

    async fn me(&self) -> ClientResult<User> {
        self.get(self.url(&["auth", "me"])).await
    }

    async fn list_children(&self) -> ClientResult<Vec<Child>> {
        self.get(self.url(&["auth", "children"])).await
    }

    async fn create_child(&self, child: &NewChild) -> ClientResult<Child> {
        let builder = self.client.post(self.url(&["auth", "children"])).json(child);
        self.send(builder).await
    }

    async fn list_domains(&self, include_system: bool) -> ClientResult<Vec<Domain>> {
        let builder = self
            .client
            .get(self.url(&["domains"]))
            .query(&[("include_system", include_system)]);
        self.send(builder).await
    }

    async fn domain(&self, domain_id: &str) -> ClientResult<Domain> {
        self.get(self.url(&["domains", domain_id])).await
    }

    async fn domain_graph(&self, domain_id: &str) -> ClientResult<LearningGraph> {
        self.get(self.url(&["domains", domain_id, "graph"])).await
    }

    async fn domain_words(&self, domain_id: &str) -> ClientResult<Vec<Word>> {
        self.get(self.url(&["domains", domain_id, "words"])).await
    }

    async fn child_progress(
        &self,
        child_id: &str,
        domain_id: Option<&str>,
    ) -> ClientResult<Vec<WordProgress>> {
        let mut builder = self.client.get(self.url(&["progress", "child", child_id]));
        if let Some(domain_id) = domain_id {
            builder = builder.query(&[("domain_id", domain_id)]);
        }
        self.send(builder).await
    }

    async fn next_words(
        &self,
        child_id: &str,
        domain_id: &str,
        limit: usize,
    ) -> ClientResult<Vec<RecommendedWord>> {
        let builder = self
            .client
            .get(self.url(&["progress", "child", child_id, "next-words"]))
            .query(&[("domain_id", domain_id.to_string()), ("limit", limit.to_string())]);
        let response: NextWordsResponse = self.send(builder).await?;
        Ok(response.words)
    }

    async fn record_attempt(
        &self,
        child_id: &str,
        word_id: &str,
        correct: bool,
    ) -> ClientResult<WordProgress> {
        let builder = self
            .client
            .post(self.url(&["progress", "child", child_id, "word", word_id, "attempt"]))
            .json(&AttemptBody { correct });
        self.send(builder).await
    }

    async fn progress_overview(&self, child_id: &str) -> ClientResult<ProgressOverview> {
        self.get(self.url(&["progress", "child", child_id, "overview"]))
            .await
    }

    async fn send_chat_message(&self, request: &ChatRequest) -> ClientResult<ChatResponse> {
        let builder = self.client.post(self.url(&["chat", "message"])).json(request);
        self.send(builder).await
    }

    async fn chat_history(&self, session_id: &str) -> ClientResult<ChatHistory> {
        self.get(self.url(&["chat", "sessions", session_id, "history"]))
            .await
    }
}
