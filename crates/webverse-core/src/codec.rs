//! JSON text codec for daemon frames.
//!
//! Wire format: one JSON object per WebSocket text frame, with a `topic`
//! string selecting the message variant.

use crate::error::{WebVerseError, WebVerseResult};
use crate::messages::Message;
use serde_json::Value;

/// Serialize a message into a text frame.
pub fn encode(message: &Message) -> WebVerseResult<String> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a text frame into a message.
///
/// Rejects frames that are not JSON objects, lack a string `topic`, name an
/// unknown topic, or miss (or mistype) a field their topic requires.
pub fn decode(text: &str) -> WebVerseResult<Message> {
    let value: Value = serde_json::from_str(text)?;

    let object = value
        .as_object()
        .ok_or_else(|| WebVerseError::InvalidMessage("frame is not a JSON object".into()))?;

    let topic = match object.get("topic") {
        Some(Value::String(t)) => t.clone(),
        Some(_) => return Err(WebVerseError::InvalidMessage("topic is not a string".into())),
        None => return Err(WebVerseError::InvalidMessage("missing topic".into())),
    };

    if !Message::TOPICS.contains(&topic.as_str()) {
        return Err(WebVerseError::InvalidMessage(format!("unknown topic: {topic}")));
    }

    serde_json::from_value(value)
        .map_err(|e| WebVerseError::InvalidMessage(format!("{topic}: {e}")))
}
