use std::{collections::HashMap, sync::Arc, time::Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    clients::{
        auth::{AccessTokenSource, FCM_SCOPE},
        rbmq::RabbitMqClient,
        redis::RedisLedger,
    },
    models::health::{HealthCheckResponse, HealthStatus, ServiceHealth},
};

const CRITICAL_CHECKS: [&str; 2] = ["message_broker", "credentials"];

pub struct HealthChecker {
    rabbit: Arc<RabbitMqClient>,
    ledger: Option<Arc<RedisLedger>>,
    token_source: Arc<dyn AccessTokenSource>,
}

impl HealthChecker {
    pub fn new(
        rabbit: Arc<RabbitMqClient>,
        ledger: Option<Arc<RedisLedger>>,
        token_source: Arc<dyn AccessTokenSource>,
    ) -> Self {
        Self {
            rabbit,
            ledger,
            token_source,
        }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        checks.insert("message_broker".to_string(), self.check_rabbitmq());
        checks.insert("credentials".to_string(), self.check_credentials().await);

        if let Some(ledger) = &self.ledger {
            checks.insert("delivery_ledger".to_string(), Self::check_ledger(ledger).await);
        }

        HealthCheckResponse {
            status: determine_overall_status(&checks),
            timestamp: Utc::now(),
            checks,
        }
    }

    fn check_rabbitmq(&self) -> ServiceHealth {
        if self.rabbit.is_connected() {
            ServiceHealth::healthy(0)
        } else {
            warn!("RabbitMQ connection lost");
            ServiceHealth::unhealthy("Connection lost".to_string())
        }
    }

    async fn check_credentials(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.token_source.access_token(&[FCM_SCOPE]).await {
            Ok(_) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Credential check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Access token unavailable");
                ServiceHealth::unhealthy(format!("Token fetch failed: {}", e))
            }
        }
    }

    async fn check_ledger(ledger: &RedisLedger) -> ServiceHealth {
        let start = Instant::now();

        match ledger.ping().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Redis health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Redis ping failed");
                ServiceHealth::degraded(format!("Redelivery checks disabled: {}", e))
            }
        }
    }
}

/// A failing critical dependency makes the service unhealthy; anything else
/// only degrades it.
pub fn determine_overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
    let critical_unhealthy = checks
        .iter()
        .filter(|(name, _)| CRITICAL_CHECKS.contains(&name.as_str()))
        .any(|(_, health)| health.status == HealthStatus::Unhealthy);

    let has_problem = checks
        .values()
        .any(|health| health.status != HealthStatus::Healthy);

    if critical_unhealthy {
        HealthStatus::Unhealthy
    } else if has_problem {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
