use std::{
    collections::HashMap,
    fmt::{Display, Formatter, Result as FmtResult},
};

use serde::{Deserialize, Serialize};

/// Maximum number of recipients FCM accepts in one multicast call.
pub const FCM_MULTICAST_LIMIT: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct FcmRequest {
    pub message: FcmMessage,
}

#[derive(Debug, Clone, Serialize)]
pub struct FcmMessage {
    pub token: String,
    pub notification: FcmNotification,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub android: Option<AndroidConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FcmNotification {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AndroidConfig {
    pub notification: AndroidNotification,
}

#[derive(Debug, Clone, Serialize)]
pub struct AndroidNotification {
    pub channel_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FcmSendResponse {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FcmErrorResponse {
    pub error: FcmErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FcmErrorBody {
    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub details: Vec<FcmErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FcmErrorDetail {
    #[serde(rename = "errorCode", default)]
    pub error_code: Option<String>,
}

impl FcmErrorBody {
    pub fn failure(&self) -> DeliveryFailure {
        let fcm_code = self
            .details
            .iter()
            .find_map(|detail| detail.error_code.as_deref());

        let failure = match fcm_code {
            Some(code) => DeliveryFailure::from_error_code(code),
            None => self
                .status
                .as_deref()
                .map(DeliveryFailure::from_status)
                .unwrap_or(DeliveryFailure::Unknown),
        };

        match failure {
            DeliveryFailure::InvalidArgument if names_registration_token(&self.message) => {
                DeliveryFailure::InvalidRegistration
            }
            other => other,
        }
    }
}

/// FCM reuses INVALID_ARGUMENT for bad payloads, so only a message that
/// points at the token itself identifies a dead registration.
fn names_registration_token(message: &str) -> bool {
    message.to_ascii_lowercase().contains("registration token")
}

/// Why the gateway refused a single token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    Unregistered,
    /// The token is malformed or no longer a valid registration.
    InvalidRegistration,
    /// The message was rejected, not the token.
    InvalidArgument,
    SenderIdMismatch,
    QuotaExceeded,
    Unavailable,
    Internal,
    ThirdPartyAuth,
    Network,
    Unknown,
}

impl DeliveryFailure {
    pub fn from_error_code(code: &str) -> Self {
        match code {
            "UNREGISTERED" => DeliveryFailure::Unregistered,
            "INVALID_ARGUMENT" => DeliveryFailure::InvalidArgument,
            "SENDER_ID_MISMATCH" => DeliveryFailure::SenderIdMismatch,
            "QUOTA_EXCEEDED" => DeliveryFailure::QuotaExceeded,
            "UNAVAILABLE" => DeliveryFailure::Unavailable,
            "INTERNAL" => DeliveryFailure::Internal,
            "THIRD_PARTY_AUTH_ERROR" => DeliveryFailure::ThirdPartyAuth,
            _ => DeliveryFailure::Unknown,
        }
    }

    fn from_status(status: &str) -> Self {
        match status {
            "NOT_FOUND" => DeliveryFailure::Unregistered,
            "INVALID_ARGUMENT" => DeliveryFailure::InvalidArgument,
            "RESOURCE_EXHAUSTED" => DeliveryFailure::QuotaExceeded,
            "UNAVAILABLE" => DeliveryFailure::Unavailable,
            "INTERNAL" => DeliveryFailure::Internal,
            _ => DeliveryFailure::Unknown,
        }
    }

    /// Retrying these tokens can never succeed.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            DeliveryFailure::Unregistered
                | DeliveryFailure::InvalidRegistration
                | DeliveryFailure::SenderIdMismatch
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            DeliveryFailure::Unregistered => "unregistered",
            DeliveryFailure::InvalidRegistration => "invalid_registration",
            DeliveryFailure::InvalidArgument => "invalid_argument",
            DeliveryFailure::SenderIdMismatch => "sender_id_mismatch",
            DeliveryFailure::QuotaExceeded => "quota_exceeded",
            DeliveryFailure::Unavailable => "unavailable",
            DeliveryFailure::Internal => "internal",
            DeliveryFailure::ThirdPartyAuth => "third_party_auth",
            DeliveryFailure::Network => "network",
            DeliveryFailure::Unknown => "unknown",
        }
    }
}

impl Display for DeliveryFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

/// One payload addressed to a batch of device tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct MulticastMessage {
    pub announcement_id: String,
    pub notification: FcmNotification,
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenFailure {
    pub token: String,
    pub reason: DeliveryFailure,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenOutcome {
    Delivered { token: String, message_id: String },
    Failed(TokenFailure),
}

/// Per-token results for one multicast call, in request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MulticastResponse {
    pub outcomes: Vec<TokenOutcome>,
}

impl MulticastResponse {
    pub fn success_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, TokenOutcome::Delivered { .. }))
            .count()
    }

    pub fn into_failures(self) -> Vec<TokenFailure> {
        self.outcomes
            .into_iter()
            .filter_map(|outcome| match outcome {
                TokenOutcome::Failed(failure) => Some(failure),
                TokenOutcome::Delivered { .. } => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_detail_wins_over_status() {
        let body: FcmErrorResponse = serde_json::from_value(serde_json::json!({
            "error": {
                "code": 404,
                "message": "Requested entity was not found.",
                "status": "NOT_FOUND",
                "details": [{
                    "@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError",
                    "errorCode": "UNREGISTERED"
                }]
            }
        }))
        .unwrap();

        assert_eq!(body.error.failure(), DeliveryFailure::Unregistered);
        assert!(body.error.failure().is_stale());
    }

    #[test]
    fn status_is_used_without_details() {
        let body: FcmErrorResponse = serde_json::from_value(serde_json::json!({
            "error": { "code": 429, "message": "quota", "status": "RESOURCE_EXHAUSTED" }
        }))
        .unwrap();

        assert_eq!(body.error.failure(), DeliveryFailure::QuotaExceeded);
        assert!(!body.error.failure().is_stale());
    }

    #[test]
    fn invalid_argument_is_stale_only_for_bad_tokens() {
        let bad_token: FcmErrorResponse = serde_json::from_value(serde_json::json!({
            "error": {
                "code": 400,
                "message": "The registration token is not a valid FCM registration token",
                "status": "INVALID_ARGUMENT",
                "details": [{ "errorCode": "INVALID_ARGUMENT" }]
            }
        }))
        .unwrap();
        let bad_payload: FcmErrorResponse = serde_json::from_value(serde_json::json!({
            "error": {
                "code": 400,
                "message": "Message is too big",
                "status": "INVALID_ARGUMENT",
                "details": [{ "errorCode": "INVALID_ARGUMENT" }]
            }
        }))
        .unwrap();

        assert_eq!(bad_token.error.failure(), DeliveryFailure::InvalidRegistration);
        assert!(bad_token.error.failure().is_stale());
        assert_eq!(bad_payload.error.failure(), DeliveryFailure::InvalidArgument);
        assert!(!bad_payload.error.failure().is_stale());
    }

    #[test]
    fn android_block_is_omitted_when_absent() {
        let request = FcmRequest {
            message: FcmMessage {
                token: "t1".to_string(),
                notification: FcmNotification {
                    title: "Exam Schedule".to_string(),
                    body: "Posted".to_string(),
                },
                data: None,
                android: None,
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "message": {
                    "token": "t1",
                    "notification": { "title": "Exam Schedule", "body": "Posted" }
                }
            })
        );
    }
}
