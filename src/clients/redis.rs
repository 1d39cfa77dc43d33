use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, Script, aio::MultiplexedConnection};
use tracing::{info, warn};

use crate::{clients::DeliveryLedger, models::status::DeliveryStatus};

/// Claims a key that is absent or `failed`, in one round trip, and returns
/// the value seen before the claim.
const CLAIM_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if current == false or current == ARGV[2] then
    redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[3])
end
return current
";

/// Redis-backed ledger of announcement deliveries.
///
/// A `processing` claim only lives for `lease_seconds`, so a worker that dies
/// mid-dispatch does not block the announcement for the full ledger TTL.
pub struct RedisLedger {
    connection: MultiplexedConnection,
    claim_script: Script,
    ttl_seconds: u64,
    lease_seconds: u64,
}

pub fn ledger_key(announcement_id: &str) -> String {
    format!("idempotency:announcement:{}", announcement_id)
}

fn parse_status(key: &str, value: Option<String>) -> DeliveryStatus {
    match value.as_deref() {
        None => DeliveryStatus::NotFound,
        Some(raw) => {
            let status = DeliveryStatus::from_string(raw);
            if status == DeliveryStatus::NotFound {
                warn!(key, value = raw, "Unknown delivery status in ledger");
            }
            status
        }
    }
}

impl RedisLedger {
    pub async fn connect(
        redis_url: &str,
        ttl_seconds: u64,
        lease_seconds: u64,
    ) -> Result<Self, Error> {
        info!("Connecting to Redis");

        let client =
            Client::open(redis_url).map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        info!(ttl_seconds, lease_seconds, "Redis connection established");

        Ok(Self {
            connection,
            claim_script: Script::new(CLAIM_SCRIPT),
            ttl_seconds,
            lease_seconds,
        })
    }

    pub async fn ping(&self) -> Result<(), Error> {
        let mut connection = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut connection)
            .await
            .map_err(|e| anyhow!("Redis ping failed: {}", e))?;
        Ok(())
    }

    fn expiry_for(&self, status: DeliveryStatus) -> u64 {
        match status {
            DeliveryStatus::Processing => self.lease_seconds,
            _ => self.ttl_seconds,
        }
    }
}

#[async_trait]
impl DeliveryLedger for RedisLedger {
    async fn claim(&self, announcement_id: &str) -> Result<DeliveryStatus, Error> {
        let key = ledger_key(announcement_id);
        let mut connection = self.connection.clone();

        let previous: Option<String> = self
            .claim_script
            .key(&key)
            .arg(DeliveryStatus::Processing.as_str())
            .arg(DeliveryStatus::Failed.as_str())
            .arg(self.lease_seconds)
            .invoke_async(&mut connection)
            .await
            .map_err(|e| anyhow!("Failed to claim delivery: {}", e))?;

        Ok(parse_status(&key, previous))
    }

    async fn record(&self, announcement_id: &str, status: DeliveryStatus) -> Result<(), Error> {
        let key = ledger_key(announcement_id);
        let mut connection = self.connection.clone();

        connection
            .set_ex::<_, _, ()>(&key, status.as_str(), self.expiry_for(status))
            .await
            .map_err(|e| anyhow!("Failed to record delivery as {}: {}", status, e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_keys_are_namespaced_by_announcement() {
        assert_eq!(ledger_key("abc123"), "idempotency:announcement:abc123");
    }

    #[test]
    fn missing_values_read_as_unclaimed() {
        assert_eq!(parse_status("k", None), DeliveryStatus::NotFound);
        assert_eq!(
            parse_status("k", Some("failed".to_string())),
            DeliveryStatus::Failed
        );
    }
}
