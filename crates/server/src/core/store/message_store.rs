//! SQLite-backed message store.
//!
//! Messages are written before any live delivery is attempted, so a
//! recipient who is offline still finds them (unseen) on the next fetch.

use crate::core::models::{from_db_time, to_db_time, Message};
use anyhow::{Context, Result};
use chrono::{SubsecRound, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

type MessageRow = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    bool,
    String,
);

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, text, image, seen, created_at";

fn row_to_message(row: MessageRow) -> Result<Message> {
    let (id, sender_id, receiver_id, text, image, seen, created_at) = row;
    Ok(Message {
        created_at: from_db_time(&created_at)
            .with_context(|| format!("Unreadable message {}", id))?,
        id,
        sender_id,
        receiver_id,
        text,
        image,
        seen,
    })
}

pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a new, unseen message.
    pub async fn append(
        &self,
        sender_id: &str,
        receiver_id: &str,
        text: Option<String>,
        image: Option<String>,
    ) -> Result<Message> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            text,
            image,
            seen: false,
            created_at: Utc::now().trunc_subsecs(6),
        };

        sqlx::query(
            "INSERT INTO messages (id, sender_id, receiver_id, text, image, seen, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.sender_id)
        .bind(&message.receiver_id)
        .bind(&message.text)
        .bind(&message.image)
        .bind(message.seen)
        .bind(to_db_time(message.created_at))
        .execute(&self.pool)
        .await
        .context("Failed to insert message")?;

        info!(
            "[Messages] Stored {} ({} -> {})",
            message.id, message.sender_id, message.receiver_id
        );

        Ok(message)
    }

    /// Every message exchanged between `a` and `b`, oldest first.
    pub async fn conversation(&self, a: &str, b: &str) -> Result<Vec<Message>> {
        let sql = format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE (sender_id = ?1 AND receiver_id = ?2)
               OR (sender_id = ?2 AND receiver_id = ?1)
            ORDER BY created_at ASC, rowid ASC
            "#
        );
        let rows: Vec<MessageRow> = sqlx::query_as(&sql)
            .bind(a)
            .bind(b)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load conversation")?;

        rows.into_iter().map(row_to_message).collect()
    }

    /// Mark everything `from` sent to `to` as seen. Returns rows updated.
    pub async fn mark_conversation_seen(&self, from: &str, to: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE messages SET seen = 1 WHERE sender_id = ? AND receiver_id = ? AND seen = 0",
        )
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await?;

        debug!(
            "[Messages] Marked {} seen ({} -> {})",
            result.rows_affected(),
            from,
            to
        );
        Ok(result.rows_affected())
    }

    /// Mark a single message seen. Only the receiver may do this; returns
    /// false when no such message is addressed to `receiver_id`.
    pub async fn mark_seen(&self, message_id: &str, receiver_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE messages SET seen = 1 WHERE id = ? AND receiver_id = ?")
            .bind(message_id)
            .bind(receiver_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Unseen message counts addressed to `user_id`, keyed by sender.
    /// Senders with nothing unseen are absent.
    pub async fn unseen_counts(&self, user_id: &str) -> Result<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT sender_id, COUNT(*) FROM messages WHERE receiver_id = ? AND seen = 0 GROUP BY sender_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to count unseen messages")?;

        Ok(rows.into_iter().collect())
    }
}
