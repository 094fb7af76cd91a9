use super::{sql, Store, StoreError};
use crate::queue::IncomingMessage;
use rusqlite::{params, OptionalExtension};

/// A chat message kept for a registered chat. `seq` orders messages by
/// arrival and is what the agent cursor points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub seq: i64,
    pub message_id: String,
    pub chat_target: String,
    pub sender_name: String,
    pub text: String,
    pub timestamp: i64,
}

fn cursor_key(chat_target: &str) -> String {
    format!("agent_cursor:{chat_target}")
}

impl Store {
    /// Returns false for a message id already stored for the chat.
    pub fn insert_message(&self, message: &IncomingMessage) -> Result<bool, StoreError> {
        let connection = self.connect()?;
        let inserted = connection
            .execute(
                "
                INSERT OR IGNORE INTO messages (message_id, chat_target, sender_name, text, timestamp)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ",
                params![
                    message.message_id,
                    message.chat_target,
                    message.sender_name,
                    message.text,
                    message.timestamp,
                ],
            )
            .map_err(sql)?;
        Ok(inserted == 1)
    }

    /// Messages after the chat's agent cursor, oldest first.
    pub fn messages_since_cursor(&self, chat_target: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let cursor = self.agent_cursor(chat_target)?;
        let connection = self.connect()?;
        let mut statement = connection
            .prepare(
                "
                SELECT seq, message_id, chat_target, sender_name, text, timestamp
                FROM messages
                WHERE chat_target = ?1 AND seq > ?2
                ORDER BY seq ASC
                ",
            )
            .map_err(sql)?;
        let rows = statement
            .query_map(params![chat_target, cursor], |row| {
                Ok(StoredMessage {
                    seq: row.get(0)?,
                    message_id: row.get(1)?,
                    chat_target: row.get(2)?,
                    sender_name: row.get(3)?,
                    text: row.get(4)?,
                    timestamp: row.get(5)?,
                })
            })
            .map_err(sql)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sql)
    }

    pub fn agent_cursor(&self, chat_target: &str) -> Result<i64, StoreError> {
        let connection = self.connect()?;
        let raw: Option<String> = connection
            .query_row(
                "SELECT value FROM router_state WHERE key = ?1",
                params![cursor_key(chat_target)],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql)?;
        match raw {
            None => Ok(0),
            Some(raw) => raw.parse::<i64>().map_err(|_| StoreError::Corrupt {
                column: "agent cursor",
                value: raw,
            }),
        }
    }

    /// Moves the cursor forward; never backwards.
    pub fn advance_agent_cursor(&self, chat_target: &str, seq: i64) -> Result<(), StoreError> {
        let current = self.agent_cursor(chat_target)?;
        if seq <= current {
            return Ok(());
        }
        let connection = self.connect()?;
        connection
            .execute(
                "
                INSERT INTO router_state (key, value) VALUES (?1, ?2)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                ",
                params![cursor_key(chat_target), seq.to_string()],
            )
            .map_err(sql)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn message(id: &str, chat: &str) -> IncomingMessage {
        IncomingMessage {
            message_id: id.to_string(),
            chat_target: chat.to_string(),
            sender_name: "Alice".to_string(),
            text: format!("text {id}"),
            timestamp: 1_000,
        }
    }

    #[test]
    fn cursor_bounds_what_is_returned() {
        let dir = tempdir().expect("tempdir");
        let store = Store::open(&dir.path().join("db.sqlite")).expect("open");
        assert!(store.insert_message(&message("m1", "a@chat")).expect("insert"));
        assert!(!store.insert_message(&message("m1", "a@chat")).expect("dupe"));
        store.insert_message(&message("m2", "a@chat")).expect("insert");
        store.insert_message(&message("x1", "b@chat")).expect("insert");

        let pending = store.messages_since_cursor("a@chat").expect("since");
        let ids: Vec<_> = pending.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);

        store
            .advance_agent_cursor("a@chat", pending[0].seq)
            .expect("advance");
        let pending = store.messages_since_cursor("a@chat").expect("since");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message_id, "m2");

        store.advance_agent_cursor("a@chat", 0).expect("no-op");
        assert_eq!(store.messages_since_cursor("a@chat").expect("since").len(), 1);
        assert_eq!(store.messages_since_cursor("b@chat").expect("since").len(), 1);
    }
}
