use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    clients::{
        TokenPruner, UserDirectory,
        auth::{AccessTokenSource, FIRESTORE_SCOPE},
    },
    config::Config,
    error::StoreError,
    models::{
        announcement::Target,
        firestore::{
            Document, FIRESTORE_IN_LIMIT, FirestoreErrorResponse, RunQueryRequest,
            RunQueryResponseItem,
        },
        user::{StaleToken, User},
    },
};

#[derive(Debug, Clone)]
pub struct FirestoreSettings {
    pub base_url: String,
    pub project_id: String,
    pub database: String,
    pub users_collection: String,
    pub page_size: usize,
    pub request_timeout: Duration,
}

impl FirestoreSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.firestore_base_url.clone(),
            project_id: config.firebase_project_id.clone(),
            database: config.firestore_database.clone(),
            users_collection: config.users_collection.clone(),
            page_size: config.query_page_size,
            request_timeout: config.request_timeout(),
        }
    }
}

/// Firestore REST client over the users collection.
pub struct FirestoreClient {
    http_client: Client,
    documents_url: String,
    users_collection: String,
    page_size: usize,
    token_source: Arc<dyn AccessTokenSource>,
}

impl FirestoreClient {
    pub fn new(
        settings: FirestoreSettings,
        token_source: Arc<dyn AccessTokenSource>,
    ) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        let documents_url = format!(
            "{}/projects/{}/databases/{}/documents",
            settings.base_url.trim_end_matches('/'),
            settings.project_id,
            settings.database
        );

        info!(
            project_id = %settings.project_id,
            collection = %settings.users_collection,
            "Firestore client initialized"
        );

        Ok(Self {
            http_client,
            documents_url,
            users_collection: settings.users_collection,
            page_size: settings.page_size.max(1),
            token_source,
        })
    }

    async fn bearer(&self) -> Result<String, StoreError> {
        self.token_source
            .access_token(&[FIRESTORE_SCOPE])
            .await
            .map_err(StoreError::Auth)
    }

    async fn query_users(
        &self,
        bearer: &str,
        roles: Option<&[String]>,
    ) -> Result<Vec<User>, StoreError> {
        let mut users = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let request = RunQueryRequest::users_page(
                &self.users_collection,
                roles,
                self.page_size,
                cursor.as_deref(),
            );
            let documents = self.run_query(bearer, &request).await?;
            let fetched = documents.len();

            debug!(fetched, page_size = self.page_size, "Fetched users page");

            cursor = documents.last().map(|document| document.name.clone());
            users.extend(documents.into_iter().map(Document::into_user));

            if fetched < self.page_size {
                return Ok(users);
            }
        }
    }

    async fn run_query(
        &self,
        bearer: &str,
        request: &RunQueryRequest,
    ) -> Result<Vec<Document>, StoreError> {
        let url = format!("{}:runQuery", self.documents_url);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(bearer)
            .json(request)
            .send()
            .await?;

        let response = ensure_success(response).await?;

        let items: Vec<RunQueryResponseItem> = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        Ok(items.into_iter().filter_map(|item| item.document).collect())
    }

    fn user_url(&self, user_id: &str) -> String {
        format!("{}/{}/{}", self.documents_url, self.users_collection, user_id)
    }

    async fn get_user_document(
        &self,
        bearer: &str,
        user_id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let response = self
            .http_client
            .get(self.user_url(user_id))
            .bearer_auth(bearer)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = ensure_success(response).await?;
        let document = response
            .json::<Document>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        Ok(Some(document))
    }

    /// Clears `fcmToken` if the document still holds `stale.token` and has not
    /// changed since it was read.
    async fn clear_token(&self, bearer: &str, stale: &StaleToken) -> Result<bool, StoreError> {
        let Some(document) = self.get_user_document(bearer, &stale.user_id).await? else {
            return Ok(false);
        };

        let stored = document.string_field("fcmToken");
        if stored.as_deref().map(str::trim) != Some(stale.token.trim()) {
            debug!(user_id = %stale.user_id, "Token already rotated, skipping prune");
            return Ok(false);
        }

        let mut query = vec![("updateMask.fieldPaths", "fcmToken".to_string())];
        if let Some(update_time) = document.update_time {
            query.push(("currentDocument.updateTime", update_time));
        }

        let response = self
            .http_client
            .patch(self.user_url(&stale.user_id))
            .bearer_auth(bearer)
            .query(&query)
            .json(&json!({ "fields": {} }))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                debug!(user_id = %stale.user_id, "User changed during prune, skipping");
                Ok(false)
            }
            _ => ensure_success(response).await.map(|_| false),
        }
    }
}

async fn ensure_success(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<FirestoreErrorResponse>(&error_text)
        .map(|parsed| match parsed.error.status {
            Some(code) => format!("{}: {}", code, parsed.error.message),
            None => parsed.error.message,
        })
        .unwrap_or(error_text);

    Err(StoreError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl UserDirectory for FirestoreClient {
    async fn find_recipients(&self, target: &Target) -> Result<Vec<User>, StoreError> {
        let bearer = self.bearer().await?;

        match target {
            Target::All => self.query_users(&bearer, None).await,
            Target::Roles(roles) => {
                let roles: Vec<String> = roles.iter().cloned().collect();
                let mut users = Vec::new();

                // Roles are disjoint between chunks, so the results never overlap.
                for chunk in roles.chunks(FIRESTORE_IN_LIMIT) {
                    users.extend(self.query_users(&bearer, Some(chunk)).await?);
                }

                Ok(users)
            }
        }
    }
}

#[async_trait]
impl TokenPruner for FirestoreClient {
    async fn prune(&self, stale: &[StaleToken]) -> Result<usize, StoreError> {
        let bearer = self.bearer().await?;
        let mut pruned = 0;

        for entry in stale {
            match self.clear_token(&bearer, entry).await {
                Ok(true) => pruned += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(user_id = %entry.user_id, error = %e, "Failed to prune stale token");
                }
            }
        }

        Ok(pruned)
    }
}
