use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnnouncementError {
    #[error("Announcement payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Announcement is missing its id")]
    MissingId,

    #[error("Announcement target must be ALL or a non-empty role list")]
    EmptyTarget,
}

/// Failure to read recipients from the user store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Store rejected query with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Unexpected store response: {0}")]
    Decode(String),

    #[error("Store credentials unavailable: {0}")]
    Auth(String),
}

/// Failure to reach the push gateway for a whole batch.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway credentials unavailable: {0}")]
    Auth(String),

    #[error("Gateway unreachable: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Recipient query failed for announcement {announcement_id}: {source}")]
    Query {
        announcement_id: String,
        #[source]
        source: StoreError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StoreError::Rejected {
            status: 403,
            message: "PERMISSION_DENIED".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Store rejected query with status 403: PERMISSION_DENIED"
        );

        let err = DispatchError::Query {
            announcement_id: "a1".to_string(),
            source: StoreError::Decode("missing fields".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Recipient query failed for announcement a1: Unexpected store response: missing fields"
        );

        assert_eq!(
            AnnouncementError::EmptyTarget.to_string(),
            "Announcement target must be ALL or a non-empty role list"
        );
    }
}
