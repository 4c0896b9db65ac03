use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::ChatMessage;
use crate::hangman::GameStatus;
use crate::models::HangmanRole;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, firstname: String, lastname: String },

    /// Users online at the moment the connection was identified
    PresenceList { online: Vec<Uuid> },

    /// A user came online or went offline
    PresenceUpdate { user_id: Uuid, online: bool },

    RoomJoined { room: String },

    RoomLeft { room: String },

    /// A chat message was stored and is being fanned out to its room
    MessageCreate { message: ChatMessage },

    /// A command was rejected; only sent to the connection that issued it
    Error { message: String },

    HangmanGameStarted { invite_id: Uuid, role: HangmanRole },

    HangmanPlayerJoined { invite_id: Uuid, user_id: Uuid },

    HangmanWordSubmitted { invite_id: Uuid, length: usize, masked: String },

    HangmanLetterGuessed {
        invite_id: Uuid,
        letter: char,
        correct: bool,
        masked: String,
        incorrect_guesses: u8,
        status: GameStatus,
        /// Only present once the round is won or lost
        word: Option<String>,
    },

    HangmanReplayStarted { invite_id: Uuid },

    HangmanOpponentLeft { invite_id: Uuid, user_id: Uuid },
}

impl GatewayEvent {
    /// Returns the room name if this event is fanned out to a room. Events that
    /// return `None` are presence updates or targeted at specific users.
    pub fn room(&self) -> Option<&str> {
        match self {
            Self::MessageCreate { message } => Some(&message.room),
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    Join { room: String },

    Leave { room: String },

    SendMessage { room: String, content: String },

    HangmanJoin { invite_id: Uuid },

    /// Giver chooses the word for the current round
    HangmanSubmitWord { invite_id: Uuid, word: String },

    HangmanGuess { invite_id: Uuid, letter: String },

    HangmanReplay { invite_id: Uuid },

    HangmanLeave { invite_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_type_and_data() {
        let raw = r#"{"type":"SendMessage","data":{"room":"general","content":"salut"}}"#;
        match serde_json::from_str::<GatewayCommand>(raw).unwrap() {
            GatewayCommand::SendMessage { room, content } => {
                assert_eq!(room, "general");
                assert_eq!(content, "salut");
            }
            other => panic!("unexpected command {:?}", other),
        }

        let id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"HangmanGuess","data":{{"inviteId":"{}","letter":"e"}}}}"#, id);
        assert!(matches!(
            serde_json::from_str::<GatewayCommand>(&raw).unwrap(),
            GatewayCommand::HangmanGuess { invite_id, .. } if invite_id == id
        ));
    }

    #[test]
    fn events_serialize_camel_case_fields() {
        let event = GatewayEvent::HangmanWordSubmitted {
            invite_id: Uuid::nil(),
            length: 5,
            masked: "_____".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "HangmanWordSubmitted");
        assert_eq!(json["data"]["length"], 5);
        assert!(json["data"].get("inviteId").is_some());
        assert_eq!(event.room(), None);
    }
}
