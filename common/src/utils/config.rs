use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub http_port: u16,
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// When false every client is served the pull (redirect + refresh) flow.
    #[serde(default = "default_push_enabled")]
    pub push_enabled: bool,
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    #[serde(default = "default_submission_timeout_ms")]
    pub submission_timeout_ms: u64,
    #[serde(default = "default_max_prompt_bytes")]
    pub max_prompt_bytes: usize,
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

const fn default_push_enabled() -> bool {
    true
}

const fn default_refresh_secs() -> u64 {
    3
}

const fn default_poll_interval_ms() -> u64 {
    1_000
}

const fn default_max_consecutive_errors() -> u32 {
    3
}

const fn default_submission_timeout_ms() -> u64 {
    5_000
}

const fn default_max_prompt_bytes() -> usize {
    64 * 1024
}

const fn default_lease_secs() -> u64 {
    300
}

const fn default_idle_backoff_ms() -> u64 {
    500
}

impl AppConfig {
    /// Configuration pointing at an in-memory database, used by tests across the workspace.
    pub fn for_tests() -> Self {
        Self {
            surrealdb_address: "mem://".to_string(),
            surrealdb_username: "test".to_string(),
            surrealdb_password: "test".to_string(),
            surrealdb_namespace: "test".to_string(),
            surrealdb_database: "test".to_string(),
            http_port: 3000,
            openai_api_key: "test-key".to_string(),
            openai_base_url: default_base_url(),
            model: default_model(),
            push_enabled: true,
            refresh_secs: default_refresh_secs(),
            poll_interval_ms: 10,
            max_consecutive_errors: default_max_consecutive_errors(),
            submission_timeout_ms: default_submission_timeout_ms(),
            max_prompt_bytes: 1024,
            lease_secs: 60,
            idle_backoff_ms: 10,
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
