use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One entry in the conversation transcript.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only conversation transcript. A turn that reaches the chat phase
/// appends exactly one user entry and one assistant entry; aborted turns
/// append nothing.
#[derive(Debug, Default)]
pub struct ConversationLog {
    turns: Vec<ConversationTurn>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self { turns: Vec::new() }
    }

    pub fn append(&mut self, role: Role, text: impl Into<String>) -> Uuid {
        let turn = ConversationTurn {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
        };
        let id = turn.id;
        self.turns.push(turn);
        id
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_appends_in_order() {
        let mut log = ConversationLog::new();
        log.append(Role::User, "hello there");
        log.append(Role::Assistant, "hi, how can I help?");

        assert_eq!(log.len(), 2);
        assert_eq!(log.turns()[0].role, Role::User);
        assert_eq!(log.turns()[1].role, Role::Assistant);
        assert_ne!(log.turns()[0].id, log.turns()[1].id);
    }
}
