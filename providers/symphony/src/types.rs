//! Wire representations of the Symphony REST payloads used by the provider.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Datafeed entry type carrying an actual chat message.
pub const V2_MESSAGE_TYPE: &str = "V2Message";

pub const FORMAT_MESSAGEML: &str = "MESSAGEML";
pub const FORMAT_TEXT: &str = "TEXT";

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct AuthenticateResponse {
    #[serde(default)]
    pub name: String,
    pub token: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Echo {
    pub message: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub user_id: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SymphonyUser {
    pub id: u64,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub size: u64,
}

/// A message exactly as read from a datafeed or returned by a send.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    pub timestamp: String,
    #[serde(rename = "v2messageType", default)]
    pub message_type: String,
    pub stream_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub from_user_id: u64,
}

impl RawMessage {
    pub fn is_chat_message(&self) -> bool {
        self.message_type == V2_MESSAGE_TYPE
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct DatafeedResponse {
    pub id: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ImResponse {
    pub id: String,
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct CreateMessage<'a> {
    pub message: &'a str,
    pub format: &'a str,
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct CreateStructuredMessage<'a> {
    pub message: &'a str,
    pub data: &'a Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_message_reads_wire_names() {
        let raw: RawMessage = serde_json::from_value(json!({
            "id": "-sfAvIPTTmyrpORkBuvL_3___qulZoKedA",
            "timestamp": "1461808889185",
            "v2messageType": "V2Message",
            "streamId": "WLwnGbzxIdU8ZmPUjAs_bn___qulefJUdA",
            "message": "<messageML>Hello World</messageML>",
            "fromUserId": 7215545078229u64
        }))
        .unwrap();
        assert!(raw.is_chat_message());
        assert_eq!(raw.stream_id, "WLwnGbzxIdU8ZmPUjAs_bn___qulefJUdA");
        assert_eq!(raw.from_user_id, 7215545078229);
        assert!(raw.attachments.is_empty());
    }

    #[test]
    fn other_feed_entries_are_not_chat_messages() {
        let raw: RawMessage = serde_json::from_value(json!({
            "id": "evt-1",
            "timestamp": "1461808889185",
            "v2messageType": "UserJoinedRoomMessage",
            "streamId": "stream",
            "message": "",
            "fromUserId": 1
        }))
        .unwrap();
        assert!(!raw.is_chat_message());
    }

    #[test]
    fn user_tolerates_missing_optional_fields() {
        let user: SymphonyUser = serde_json::from_value(json!({
            "id": 7215545078229u64,
            "username": "johndoe",
            "emailAddress": "johndoe@symphony.com"
        }))
        .unwrap();
        assert_eq!(user.username.as_deref(), Some("johndoe"));
        assert!(user.display_name.is_none());
    }
}
