use serde::{Deserialize, Serialize};

/// An inbound chat message as delivered by the messaging collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    pub message_id: String,
    pub chat_target: String,
    pub sender_name: String,
    pub text: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub message_id: String,
    pub chat_target: String,
    pub text: String,
    pub timestamp: i64,
}
