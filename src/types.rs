use std::fmt;

use serde::{Deserialize, Serialize};

use crate::http::ResponseMetadata;

/// A typed response that carries header metadata next to its body fields.
///
/// Metadata is never part of the wire form; the dispatcher fills it in from
/// response headers after decoding the body.
pub trait ApiResponse {
    fn metadata(&self) -> &ResponseMetadata;
    fn metadata_mut(&mut self) -> &mut ResponseMetadata;
}

/// Implements [`ApiResponse`] for types with a `metadata: ResponseMetadata` field.
macro_rules! impl_api_response {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::types::ApiResponse for $ty {
                fn metadata(&self) -> &$crate::http::ResponseMetadata {
                    &self.metadata
                }

                fn metadata_mut(&mut self) -> &mut $crate::http::ResponseMetadata {
                    &mut self.metadata
                }
            }
        )+
    };
}
pub(crate) use impl_api_response;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Developer => "developer",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token accounting reported by generation endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: u64,
}

/// `{"object": "list", "data": [...]}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default)]
    pub object: String,
    pub data: Vec<T>,
    #[serde(skip)]
    pub metadata: ResponseMetadata,
}

impl<T> ApiResponse for ListResponse<T> {
    fn metadata(&self) -> &ResponseMetadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ResponseMetadata {
        &mut self.metadata
    }
}

/// Result of a delete call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub id: String,
    #[serde(default)]
    pub object: String,
    pub deleted: bool,
    #[serde(skip)]
    pub metadata: ResponseMetadata,
}

impl_api_response!(DeletedResponse);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_is_not_part_of_wire_form() {
        let mut deleted = DeletedResponse {
            id: "ft:model".into(),
            object: "model".into(),
            deleted: true,
            metadata: ResponseMetadata::default(),
        };
        deleted.metadata_mut().request_id = Some("req_9".into());

        let json = serde_json::to_value(&deleted).unwrap();
        assert!(json.get("metadata").is_none());

        let back: DeletedResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back.metadata, ResponseMetadata::default());
        assert_eq!(back.id, "ft:model");
    }

    #[test]
    fn roles_use_lowercase_wire_names() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        assert_eq!(Role::Tool.to_string(), "tool");
    }
}
