//! The conversation turn state machine and its transcript.

pub mod controller;
pub mod history;
pub mod state;

pub use controller::{TurnEvent, VoiceTurnController};
pub use history::{ConversationLog, ConversationTurn, Role};
pub use state::{ListeningMode, TurnState};
