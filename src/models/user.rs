use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,

    #[serde(default)]
    pub role: Option<String>,

    #[serde(default)]
    pub fcm_token: Option<String>,
}

impl User {
    /// The registered device token, if it carries anything beyond whitespace.
    pub fn device_token(&self) -> Option<&str> {
        self.fcm_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

/// A token the gateway reported as permanently undeliverable, with its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleToken {
    pub user_id: String,
    pub token: String,
}
