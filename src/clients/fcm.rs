use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use crate::{
    clients::{
        PushGateway,
        auth::{AccessTokenSource, FCM_SCOPE},
    },
    config::Config,
    error::GatewayError,
    models::fcm::{
        AndroidConfig, AndroidNotification, DeliveryFailure, FcmErrorResponse, FcmMessage,
        FcmRequest, FcmSendResponse, MulticastMessage, MulticastResponse, TokenFailure,
        TokenOutcome,
    },
};

#[derive(Debug, Clone)]
pub struct FcmSettings {
    pub base_url: String,
    pub project_id: String,
    pub android_channel: Option<String>,
    pub send_concurrency: usize,
    pub request_timeout: Duration,
}

impl FcmSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.fcm_base_url.clone(),
            project_id: config.firebase_project_id.clone(),
            android_channel: config.android_channel(),
            send_concurrency: config.send_concurrency,
            request_timeout: config.request_timeout(),
        }
    }
}

/// FCM HTTP v1 client. The v1 API addresses one token per request, so a
/// multicast is fanned out as concurrent single sends.
pub struct FcmClient {
    http_client: Client,
    send_url: String,
    android_channel: Option<String>,
    send_concurrency: usize,
    token_source: Arc<dyn AccessTokenSource>,
}

impl FcmClient {
    pub fn new(settings: FcmSettings, token_source: Arc<dyn AccessTokenSource>) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        let send_url = format!(
            "{}/projects/{}/messages:send",
            settings.base_url.trim_end_matches('/'),
            settings.project_id
        );

        info!(project_id = %settings.project_id, "FCM client initialized");

        Ok(Self {
            http_client,
            send_url,
            android_channel: settings.android_channel,
            send_concurrency: settings.send_concurrency.max(1),
            token_source,
        })
    }

    fn build_request(&self, message: &MulticastMessage, token: &str) -> FcmRequest {
        let data = HashMap::from([(
            "announcement_id".to_string(),
            message.announcement_id.clone(),
        )]);

        FcmRequest {
            message: FcmMessage {
                token: token.to_string(),
                notification: message.notification.clone(),
                data: Some(data),
                android: self.android_channel.as_ref().map(|channel_id| AndroidConfig {
                    notification: AndroidNotification {
                        channel_id: channel_id.clone(),
                    },
                }),
            },
        }
    }

    async fn send_once(
        &self,
        bearer: &str,
        message: &MulticastMessage,
        token: &str,
    ) -> Result<TokenOutcome, reqwest::Error> {
        let request = self.build_request(message, token);

        let response = self
            .http_client
            .post(&self.send_url)
            .bearer_auth(bearer)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            let message_id = response
                .json::<FcmSendResponse>()
                .await
                .map(|sent| sent.name)
                .unwrap_or_default();

            return Ok(TokenOutcome::Delivered {
                token: token.to_string(),
                message_id,
            });
        }

        let error_text = response.text().await.unwrap_or_default();
        let (reason, detail) = match serde_json::from_str::<FcmErrorResponse>(&error_text) {
            Ok(parsed) => (parsed.error.failure(), parsed.error.message),
            Err(_) => (failure_from_http_status(status), error_text),
        };

        debug!(
            announcement_id = %message.announcement_id,
            status = status.as_u16(),
            reason = %reason,
            "FCM rejected device token"
        );

        Ok(TokenOutcome::Failed(TokenFailure {
            token: token.to_string(),
            reason,
            detail,
        }))
    }
}

fn failure_from_http_status(status: StatusCode) -> DeliveryFailure {
    match status {
        StatusCode::BAD_REQUEST => DeliveryFailure::InvalidArgument,
        StatusCode::TOO_MANY_REQUESTS => DeliveryFailure::QuotaExceeded,
        StatusCode::SERVICE_UNAVAILABLE => DeliveryFailure::Unavailable,
        StatusCode::INTERNAL_SERVER_ERROR => DeliveryFailure::Internal,
        _ => DeliveryFailure::Unknown,
    }
}

#[async_trait]
impl PushGateway for FcmClient {
    async fn send_multicast(
        &self,
        message: &MulticastMessage,
    ) -> Result<MulticastResponse, GatewayError> {
        if message.tokens.is_empty() {
            return Ok(MulticastResponse::default());
        }

        let bearer = self
            .token_source
            .access_token(&[FCM_SCOPE])
            .await
            .map_err(GatewayError::Auth)?;

        let sends: Vec<_> = message
            .tokens
            .iter()
            .enumerate()
            .map(|(index, token)| {
                let bearer = bearer.as_str();
                async move { (index, self.send_once(bearer, message, token).await) }
            })
            .collect();

        let mut results: Vec<(usize, Result<TokenOutcome, reqwest::Error>)> =
            stream::iter(sends)
                .buffer_unordered(self.send_concurrency)
                .collect()
                .await;

        results.sort_by_key(|(index, _)| *index);

        if results.iter().all(|(_, result)| result.is_err()) {
            let reason = results
                .into_iter()
                .find_map(|(_, result)| result.err())
                .map(|e| e.to_string())
                .unwrap_or_default();

            warn!(
                announcement_id = %message.announcement_id,
                error = %reason,
                "FCM unreachable for every token in batch"
            );

            return Err(GatewayError::Transport(reason));
        }

        let outcomes = results
            .into_iter()
            .zip(message.tokens.iter())
            .map(|((_, result), token)| {
                result.unwrap_or_else(|e| {
                    TokenOutcome::Failed(TokenFailure {
                        token: token.clone(),
                        reason: DeliveryFailure::Network,
                        detail: e.to_string(),
                    })
                })
            })
            .collect();

        Ok(MulticastResponse { outcomes })
    }
}
