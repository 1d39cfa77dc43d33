use async_trait::async_trait;

use crate::{
    error::{GatewayError, StoreError},
    models::{
        announcement::Target,
        fcm::{MulticastMessage, MulticastResponse},
        status::DeliveryStatus,
        user::{StaleToken, User},
    },
};

pub mod auth;
pub mod fcm;
pub mod firestore;
pub mod health;
pub mod rbmq;
pub mod redis;

/// Read access to the recipient records of the user store.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_recipients(&self, target: &Target) -> Result<Vec<User>, StoreError>;
}

/// Multicast send to the push provider.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send_multicast(
        &self,
        message: &MulticastMessage,
    ) -> Result<MulticastResponse, GatewayError>;
}

/// Receives tokens the provider reported as permanently invalid.
#[async_trait]
pub trait TokenPruner: Send + Sync {
    /// Returns how many tokens were removed from the store.
    async fn prune(&self, stale: &[StaleToken]) -> Result<usize, StoreError>;
}

/// Tracks creation events across redeliveries.
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    /// Marks the announcement as processing when it is unknown or failed, as
    /// one atomic step. Returns the status seen before the claim.
    async fn claim(&self, announcement_id: &str) -> anyhow::Result<DeliveryStatus>;

    async fn record(&self, announcement_id: &str, status: DeliveryStatus) -> anyhow::Result<()>;
}
