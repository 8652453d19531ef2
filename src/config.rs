use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:8000/api";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_NEXT_WORDS_LIMIT: usize = 5;
const MAX_NEXT_WORDS_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub api_token: Option<String>,
    pub timeout: Duration,
    pub next_words_limit: usize,
    pub state_dir: PathBuf,
    pub log_level: String,
    pub file_log_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        let api_url = normalize_api_url(
            env_string("LEARNINGTOY_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        );

        let api_token = env_string("LEARNINGTOY_API_TOKEN");

        let timeout = Duration::from_millis(
            env_u64("LEARNINGTOY_TIMEOUT_MS").unwrap_or(DEFAULT_TIMEOUT_MS),
        );

        let next_words_limit = env_u64("LEARNINGTOY_NEXT_WORDS_LIMIT")
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_NEXT_WORDS_LIMIT)
            .clamp(1, MAX_NEXT_WORDS_LIMIT);

        let state_dir = env_string("LEARNINGTOY_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_state_dir);

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let file_log_dir = file_logging_enabled().then(|| {
            env_string("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./logs"))
        });

        Self {
            api_url,
            api_token,
            timeout,
            next_words_limit,
            state_dir,
            log_level,
            file_log_dir,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            next_words_limit: DEFAULT_NEXT_WORDS_LIMIT,
            state_dir: default_state_dir(),
            log_level: "info".to_string(),
            file_log_dir: None,
        }
    }
}

pub fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("learningtoy")
}

fn file_logging_enabled() -> bool {
    std::env::var("ENABLE_FILE_LOGS")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    env_string(key)?.trim().parse().ok()
}

fn normalize_api_url(url: String) -> String {
    url.trim().trim_end_matches('/').to_string()
}
