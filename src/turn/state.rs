use serde::{Deserialize, Serialize};

/// How a listening phase ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ListeningMode {
    /// Recording stops automatically on detected silence; turns loop back
    /// to Listening without user action.
    #[default]
    Continuous,
    /// Recording runs only while the user holds the talk gesture; turns
    /// end in Idle.
    PushToTalk,
}

/// The single process-wide turn state. The controller is the sole mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    Listening,
    Transcribing,
    Chatting,
    Speaking,
    Paused,
    Error,
}

impl TurnState {
    /// Whether a network-or-playback phase of a turn is in flight. At most
    /// one of these may be active; entering one requires leaving
    /// Idle/Listening first.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TurnState::Transcribing | TurnState::Chatting | TurnState::Speaking
        )
    }

    /// Whether a new listening phase may begin from this state.
    pub fn can_start_listening(&self) -> bool {
        matches!(self, TurnState::Idle | TurnState::Listening)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_states_exclude_entry_points() {
        for state in [TurnState::Transcribing, TurnState::Chatting, TurnState::Speaking] {
            assert!(state.is_active());
            assert!(!state.can_start_listening());
        }
        for state in [TurnState::Idle, TurnState::Listening] {
            assert!(!state.is_active());
            assert!(state.can_start_listening());
        }
        assert!(!TurnState::Paused.can_start_listening());
        assert!(!TurnState::Error.can_start_listening());
    }

    #[test]
    fn test_mode_deserializes_from_snake_case() {
        let mode: ListeningMode = serde_json::from_str("\"push_to_talk\"").unwrap();
        assert_eq!(mode, ListeningMode::PushToTalk);
        let mode: ListeningMode = serde_json::from_str("\"continuous\"").unwrap();
        assert_eq!(mode, ListeningMode::Continuous);
    }
}
