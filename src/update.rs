use serde::Deserialize;
use thiserror::Error;

/// Why an inbound payload could not be turned into an [`Update`]
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed update payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("update {update_id} carries no message")]
    MissingChat { update_id: i64 },
}

// Wire shapes. Only the fields the bot reads are declared; serde ignores the rest.
#[derive(Deserialize)]
struct RawUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<RawMessage>,
}

#[derive(Deserialize)]
struct RawMessage {
    chat: RawChat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct RawChat {
    id: i64,
}

/// One inbound message update. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    update_id: i64,
    chat_id: i64,
    text: Option<String>,
}

impl Update {
    /// Decode a webhook request body
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let raw: RawUpdate = serde_json::from_slice(raw)?;
        Self::from_raw(raw)
    }

    /// Decode one element of a getUpdates batch
    pub fn from_value(value: serde_json::Value) -> Result<Self, DecodeError> {
        let raw: RawUpdate = serde_json::from_value(value)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawUpdate) -> Result<Self, DecodeError> {
        let message = raw.message.ok_or(DecodeError::MissingChat {
            update_id: raw.update_id,
        })?;
        Ok(Self {
            update_id: raw.update_id,
            chat_id: message.chat.id,
            text: message.text,
        })
    }

    #[cfg(test)]
    pub fn new(update_id: i64, chat_id: i64, text: Option<&str>) -> Self {
        Self {
            update_id,
            chat_id,
            text: text.map(str::to_string),
        }
    }

    pub fn update_id(&self) -> i64 {
        self.update_id
    }

    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
}
