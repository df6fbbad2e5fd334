use serde::{Deserialize, Serialize};

/// Telegram `sendMessage` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage<'a> {
    pub chat_id: &'a str,
    pub text: &'a str,
}

/// Telegram response envelope, only the parts needed for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub ok: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// ipify response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicAddress {
    pub ip: String,
}
