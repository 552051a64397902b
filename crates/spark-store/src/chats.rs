use chrono::Utc;
use serde::{Deserialize, Serialize};
use spark_core::{PersistedTurn, Role, ServiceError, TurnStore, UserId, WebsiteId};
use tracing::instrument;
use uuid::Uuid;

use crate::database::Database;
use crate::error::StoreError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRow {
    pub id: String,
    pub user_id: UserId,
    pub website_id: Option<WebsiteId>,
    pub role: Role,
    pub content: String,
    pub created_at: String,
}

#[derive(Clone)]
pub struct ChatRepo {
    db: Database,
}

impl ChatRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, turn), fields(user_id = %turn.user_id, role = %turn.role))]
    pub fn insert(&self, turn: &PersistedTurn) -> Result<ChatRow, StoreError> {
        let row = ChatRow {
            id: Uuid::now_v7().to_string(),
            user_id: turn.user_id.clone(),
            website_id: turn.website_id.clone(),
            role: turn.role,
            content: turn.content.clone(),
            created_at: Utc::now().to_rfc3339(),
        };
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO chat_messages (id, user_id, website_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    row.id,
                    row.user_id.as_str(),
                    row.website_id.as_ref().map(WebsiteId::as_str),
                    row.role.as_str(),
                    row.content,
                    row.created_at
                ],
            )?;
            Ok(())
        })?;
        Ok(row)
    }

    /// Turns recorded for `user`, oldest first.
    #[instrument(skip(self), fields(user_id = %user))]
    pub fn list_for_user(&self, user: &UserId) -> Result<Vec<ChatRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, website_id, role, content, created_at
                 FROM chat_messages WHERE user_id = ?1 ORDER BY rowid ASC",
            )?;
            let rows = stmt.query_map([user.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?;

            let mut out = Vec::new();
            for row in rows {
                let (id, user_id, website_id, role, content, created_at) = row?;
                let role = role
                    .parse::<Role>()
                    .map_err(|e| StoreError::Database(format!("chat_messages.role: {e}")))?;
                out.push(ChatRow {
                    id,
                    user_id: UserId::from_raw(user_id),
                    website_id: website_id.map(WebsiteId::from_raw),
                    role,
                    content,
                    created_at,
                });
            }
            Ok(out)
        })
    }
}

impl TurnStore for ChatRepo {
    fn persist_turn(&self, turn: &PersistedTurn) -> Result<(), ServiceError> {
        let _ = self.insert(turn)?;
        Ok(())
    }
}
