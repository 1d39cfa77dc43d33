use serde::{Deserialize, Serialize};

/// Dead-letter record for a creation event the worker could not complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub announcement_id: Option<String>,
    pub original_payload: String,
    pub failure_reason: String,
    pub failed_at: String,
}

impl DlqMessage {
    pub fn new(announcement_id: Option<String>, payload: &[u8], failure_reason: String) -> Self {
        Self {
            announcement_id,
            original_payload: String::from_utf8_lossy(payload).into_owned(),
            failure_reason,
            failed_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
