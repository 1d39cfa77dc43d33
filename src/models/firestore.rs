use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::models::user::User;

/// Firestore caps the number of values in an `IN` filter.
pub const FIRESTORE_IN_LIMIT: usize = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct RunQueryResponseItem {
    #[serde(default)]
    pub document: Option<Document>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub name: String,

    #[serde(default)]
    pub fields: HashMap<String, Value>,

    #[serde(default)]
    pub update_time: Option<String>,
}

impl Document {
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Reads a `stringValue` field; other value kinds count as absent.
    pub fn string_field(&self, field: &str) -> Option<String> {
        self.fields
            .get(field)
            .and_then(|value| value.get("stringValue"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn into_user(self) -> User {
        User {
            id: self.id().to_string(),
            role: self.string_field("role"),
            fcm_token: self.string_field("fcmToken"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FirestoreErrorResponse {
    pub error: FirestoreErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FirestoreErrorBody {
    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryRequest {
    pub structured_query: Value,
}

impl RunQueryRequest {
    /// A page of the users collection projected to the fields recipients need.
    pub fn users_page(
        collection: &str,
        roles: Option<&[String]>,
        page_size: usize,
        start_after: Option<&str>,
    ) -> Self {
        let mut query = json!({
            "from": [{ "collectionId": collection }],
            "select": {
                "fields": [
                    { "fieldPath": "role" },
                    { "fieldPath": "fcmToken" }
                ]
            },
            "orderBy": [{
                "field": { "fieldPath": "__name__" },
                "direction": "ASCENDING"
            }],
            "limit": page_size,
        });

        if let Some(roles) = roles {
            let values: Vec<Value> = roles
                .iter()
                .map(|role| json!({ "stringValue": role }))
                .collect();

            query["where"] = json!({
                "fieldFilter": {
                    "field": { "fieldPath": "role" },
                    "op": "IN",
                    "value": { "arrayValue": { "values": values } }
                }
            });
        }

        if let Some(name) = start_after {
            query["startAt"] = json!({
                "values": [{ "referenceValue": name }],
                "before": false
            });
        }

        Self {
            structured_query: query,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_decodes_into_user() {
        let document: Document = serde_json::from_value(json!({
            "name": "projects/p/databases/(default)/documents/users/u42",
            "fields": {
                "role": { "stringValue": "faculty" },
                "fcmToken": { "nullValue": null }
            }
        }))
        .unwrap();

        let user = document.into_user();
        assert_eq!(user.id, "u42");
        assert_eq!(user.role.as_deref(), Some("faculty"));
        assert_eq!(user.fcm_token, None);
    }

    #[test]
    fn role_filter_and_cursor_are_optional() {
        let request = RunQueryRequest::users_page("users", None, 100, None);
        assert!(request.structured_query.get("where").is_none());
        assert!(request.structured_query.get("startAt").is_none());

        let roles = vec!["faculty".to_string()];
        let request = RunQueryRequest::users_page(
            "users",
            Some(&roles),
            100,
            Some("projects/p/databases/(default)/documents/users/u1"),
        );
        let query = &request.structured_query;
        assert_eq!(query["where"]["fieldFilter"]["op"], "IN");
        assert_eq!(
            query["where"]["fieldFilter"]["value"]["arrayValue"]["values"][0]["stringValue"],
            "faculty"
        );
        assert_eq!(query["startAt"]["before"], false);
        assert_eq!(query["limit"], 100);
    }
}
