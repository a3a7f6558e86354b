use santa_core::{Participant, Poll};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SYSTEM_SENDER: &str = "System";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    System {
        sender: String,
        message: String,
    },
    Chat {
        sender: String,
        message: String,
    },
    ParticipantRemoved {
        sender: String,
        message: String,
        removed_id: String,
    },
    PollCreated {
        poll: Poll,
    },
    PollVoted {
        poll_id: String,
        poll: Poll,
    },
}

impl RoomEvent {
    pub fn system(message: impl Into<String>) -> Self {
        Self::System {
            sender: SYSTEM_SENDER.to_string(),
            message: message.into(),
        }
    }

    pub fn joined(name: &str) -> Self {
        Self::system(format!("{name} joined the chat."))
    }

    pub fn chat(sender: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Chat {
            sender: sender.into(),
            message: message.into(),
        }
    }

    pub fn participant_removed(participant: &Participant) -> Self {
        Self::ParticipantRemoved {
            sender: SYSTEM_SENDER.to_string(),
            message: format!(
                "{} was removed from the room by the host.",
                participant.name
            ),
            removed_id: participant.id.clone(),
        }
    }

    pub fn poll_voted(poll: Poll) -> Self {
        Self::PollVoted {
            poll_id: poll.id.clone(),
            poll,
        }
    }
}

/// Text to relay for one inbound chat frame. Anything but a JSON object
/// with a string `message` is relayed verbatim.
pub fn chat_text(raw: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(fields)) => match fields.get("message") {
            Some(Value::String(message)) => message.clone(),
            None => String::new(),
            Some(_) => raw.to_string(),
        },
        _ => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn system_event_wire_shape() {
        let value = serde_json::to_value(RoomEvent::joined("alice")).unwrap();
        assert_eq!(
            value,
            json!({"type": "system", "sender": "System", "message": "alice joined the chat."})
        );
    }

    #[test]
    fn removal_event_carries_id() {
        let participant = Participant::new("p-1", "bob");
        let value = serde_json::to_value(RoomEvent::participant_removed(&participant)).unwrap();
        assert_eq!(value["type"], "participant_removed");
        assert_eq!(value["removed_id"], "p-1");
        assert_eq!(value["message"], "bob was removed from the room by the host.");
    }

    #[test]
    fn poll_voted_repeats_poll_id() {
        let poll = Poll::new("poll-1", "Budget?", &["$20".to_string(), "$50".to_string()], "alice")
            .unwrap();
        let value = serde_json::to_value(RoomEvent::poll_voted(poll)).unwrap();
        assert_eq!(value["type"], "poll_voted");
        assert_eq!(value["poll_id"], "poll-1");
        assert_eq!(value["poll"]["question"], "Budget?");
    }

    #[test]
    fn structured_chat_uses_message_field() {
        assert_eq!(chat_text(r#"{"message":"hi all"}"#), "hi all");
        assert_eq!(chat_text(r#"{"other":1}"#), "");
    }

    #[test]
    fn malformed_chat_relayed_verbatim() {
        assert_eq!(chat_text("plain words"), "plain words");
        assert_eq!(chat_text(r#"{"message": 5}"#), r#"{"message": 5}"#);
        assert_eq!(chat_text("[1,2]"), "[1,2]");
        assert_eq!(chat_text(r#"["hi"]"#), r#"["hi"]"#);
        assert_eq!(chat_text("[]"), "[]");
        assert_eq!(chat_text(r#""quoted""#), r#""quoted""#);
    }
}
