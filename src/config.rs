use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::fcm::FCM_MULTICAST_LIMIT;

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub firebase_project_id: String,
    #[serde(default = "default_firestore_database")]
    pub firestore_database: String,
    #[serde(default = "default_firestore_base_url")]
    pub firestore_base_url: String,
    #[serde(default = "default_fcm_base_url")]
    pub fcm_base_url: String,
    #[serde(default = "default_users_collection")]
    pub users_collection: String,
    #[serde(default = "default_query_page_size")]
    pub query_page_size: usize,

    pub rabbitmq_url: String,
    #[serde(default = "default_announcement_queue_name")]
    pub announcement_queue_name: String,
    #[serde(default = "default_failed_queue_name")]
    pub failed_queue_name: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_idempotency_ttl_seconds")]
    pub idempotency_ttl_seconds: u64,
    #[serde(default = "default_processing_lease_seconds")]
    pub processing_lease_seconds: u64,

    #[serde(default = "default_fcm_batch_size")]
    pub fcm_batch_size: usize,
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
    #[serde(default = "default_send_concurrency")]
    pub send_concurrency: usize,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    #[serde(default)]
    pub dispatch_deadline_seconds: Option<u64>,
    #[serde(default = "default_deadline_margin_ms")]
    pub deadline_margin_ms: u64,
    #[serde(default = "default_android_channel_id")]
    pub android_channel_id: String,
    #[serde(default)]
    pub prune_stale_tokens: bool,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_log_json")]
    pub log_json: bool,
}

fn default_firestore_database() -> String {
    "(default)".to_string()
}

fn default_firestore_base_url() -> String {
    "https://firestore.googleapis.com/v1".to_string()
}

fn default_fcm_base_url() -> String {
    "https://fcm.googleapis.com/v1".to_string()
}

fn default_users_collection() -> String {
    "users".to_string()
}

fn default_query_page_size() -> usize {
    500
}

fn default_announcement_queue_name() -> String {
    "announcements.created".to_string()
}

fn default_failed_queue_name() -> String {
    "announcements.failed".to_string()
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_idempotency_ttl_seconds() -> u64 {
    86_400
}

fn default_processing_lease_seconds() -> u64 {
    300
}

fn default_fcm_batch_size() -> usize {
    FCM_MULTICAST_LIMIT
}

fn default_batch_concurrency() -> usize {
    4
}

fn default_send_concurrency() -> usize {
    50
}

fn default_request_timeout_seconds() -> u64 {
    10
}

fn default_deadline_margin_ms() -> u64 {
    2_000
}

fn default_android_channel_id() -> String {
    "default_channel".to_string()
}

fn default_server_port() -> u16 {
    8080
}

fn default_log_json() -> bool {
    true
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.firebase_project_id.trim().is_empty() {
            return Err(anyhow!("FIREBASE_PROJECT_ID cannot be empty"));
        }

        if !(1..=FCM_MULTICAST_LIMIT).contains(&self.fcm_batch_size) {
            return Err(anyhow!(
                "FCM_BATCH_SIZE must be between 1 and {}",
                FCM_MULTICAST_LIMIT
            ));
        }

        if self.query_page_size == 0 {
            return Err(anyhow!("QUERY_PAGE_SIZE must be positive"));
        }

        if self.batch_concurrency == 0 || self.send_concurrency == 0 || self.worker_concurrency == 0
        {
            return Err(anyhow!("Concurrency limits must be positive"));
        }

        if self.processing_lease_seconds == 0
            || self.processing_lease_seconds > self.idempotency_ttl_seconds
        {
            return Err(anyhow!(
                "PROCESSING_LEASE_SECONDS must be positive and no longer than IDEMPOTENCY_TTL_SECONDS"
            ));
        }

        Ok(())
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            batch_size: self.fcm_batch_size,
            batch_concurrency: self.batch_concurrency,
            deadline: self.dispatch_deadline_seconds.map(Duration::from_secs),
            deadline_margin: Duration::from_millis(self.deadline_margin_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn android_channel(&self) -> Option<String> {
        Some(self.android_channel_id.trim())
            .filter(|channel| !channel.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub batch_size: usize,
    pub batch_concurrency: usize,
    pub deadline: Option<Duration>,
    pub deadline_margin: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: FCM_MULTICAST_LIMIT,
            batch_concurrency: default_batch_concurrency(),
            deadline: None,
            deadline_margin: Duration::from_millis(default_deadline_margin_ms()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, envy::Error> {
        envy::from_iter::<_, Config>(
            pairs
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string())),
        )
    }

    #[test]
    fn defaults_apply_for_optional_variables() {
        let config = from_pairs(&[
            ("FIREBASE_PROJECT_ID", "campus"),
            ("RABBITMQ_URL", "amqp://localhost:5672"),
        ])
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.fcm_batch_size, 500);
        assert_eq!(config.users_collection, "users");
        assert_eq!(config.redis_url, None);
        assert_eq!(config.android_channel().as_deref(), Some("default_channel"));
        assert!(config.dispatch_config().deadline.is_none());
        assert!(!config.prune_stale_tokens);
    }

    #[test]
    fn batch_size_above_provider_limit_is_rejected() {
        let config = from_pairs(&[
            ("FIREBASE_PROJECT_ID", "campus"),
            ("RABBITMQ_URL", "amqp://localhost:5672"),
            ("FCM_BATCH_SIZE", "501"),
        ])
        .unwrap();

        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_channel_disables_android_block() {
        let config = from_pairs(&[
            ("FIREBASE_PROJECT_ID", "campus"),
            ("RABBITMQ_URL", "amqp://localhost:5672"),
            ("ANDROID_CHANNEL_ID", " "),
            ("DISPATCH_DEADLINE_SECONDS", "60"),
        ])
        .unwrap();

        assert_eq!(config.android_channel(), None);
        assert_eq!(
            config.dispatch_config().deadline,
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn processing_lease_cannot_outlive_ledger_ttl() {
        let config = from_pairs(&[
            ("FIREBASE_PROJECT_ID", "campus"),
            ("RABBITMQ_URL", "amqp://localhost:5672"),
            ("IDEMPOTENCY_TTL_SECONDS", "60"),
            ("PROCESSING_LEASE_SECONDS", "120"),
        ])
        .unwrap();

        assert!(config.validate().is_err());
    }
}
