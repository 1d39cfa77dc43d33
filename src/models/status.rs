use std::fmt::{Display, Formatter, Result};

use serde::{Deserialize, Serialize};

/// Ledger state of one announcement delivery, keyed by announcement id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    NotFound,
    Processing,
    Sent,
    Partial,
    Failed,
}

impl DeliveryStatus {
    pub fn from_string(s: &str) -> Self {
        match s {
            "processing" => DeliveryStatus::Processing,
            "sent" => DeliveryStatus::Sent,
            "partial" => DeliveryStatus::Partial,
            "failed" => DeliveryStatus::Failed,
            _ => DeliveryStatus::NotFound,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DeliveryStatus::NotFound => "not_found",
            DeliveryStatus::Processing => "processing",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Partial => "partial",
            DeliveryStatus::Failed => "failed",
        }
    }

    /// Whether a redelivered event in this state should be dispatched again.
    pub fn allows_dispatch(&self) -> bool {
        matches!(self, DeliveryStatus::NotFound | DeliveryStatus::Failed)
    }
}

impl Display for DeliveryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unknown_and_failed_deliveries_are_redispatched() {
        assert!(DeliveryStatus::NotFound.allows_dispatch());
        assert!(DeliveryStatus::Failed.allows_dispatch());
        assert!(!DeliveryStatus::Processing.allows_dispatch());
        assert!(!DeliveryStatus::Sent.allows_dispatch());
        assert!(!DeliveryStatus::Partial.allows_dispatch());
    }

    #[test]
    fn unknown_values_read_as_not_found() {
        assert_eq!(DeliveryStatus::from_string("partial"), DeliveryStatus::Partial);
        assert_eq!(DeliveryStatus::from_string("queued"), DeliveryStatus::NotFound);
    }
}
