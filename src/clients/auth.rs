use std::sync::Arc;

use async_trait::async_trait;
use gcp_auth::TokenProvider;
use tracing::info;

pub const FIRESTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";
pub const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

/// Source of OAuth2 bearer tokens for Google APIs.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self, scopes: &[&str]) -> Result<String, String>;
}

/// Application default credentials, resolved once per process.
pub struct GcpTokenSource {
    provider: Arc<dyn TokenProvider>,
}

impl GcpTokenSource {
    pub async fn from_environment() -> Result<Self, gcp_auth::Error> {
        let provider = gcp_auth::provider().await?;
        info!("Google application credentials loaded");

        Ok(Self { provider })
    }
}

#[async_trait]
impl AccessTokenSource for GcpTokenSource {
    async fn access_token(&self, scopes: &[&str]) -> Result<String, String> {
        self.provider
            .token(scopes)
            .await
            .map(|token| token.as_str().to_string())
            .map_err(|e| e.to_string())
    }
}

/// Fixed token, for emulators and tests.
pub struct StaticTokenSource(pub String);

#[async_trait]
impl AccessTokenSource for StaticTokenSource {
    async fn access_token(&self, _scopes: &[&str]) -> Result<String, String> {
        Ok(self.0.clone())
    }
}
