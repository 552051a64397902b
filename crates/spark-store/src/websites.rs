use chrono::Utc;
use rusqlite::{OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use spark_core::{OwnershipCheck, ServiceError, UserId, WebsiteId};
use tracing::instrument;
use uuid::Uuid;

use crate::database::Database;
use crate::error::StoreError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteRow {
    pub id: WebsiteId,
    pub user_id: UserId,
    pub subdomain: String,
    pub title: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Clone, Debug)]
pub struct NewWebsite<'a> {
    pub user_id: &'a UserId,
    pub subdomain: &'a str,
    pub title: &'a str,
}

const COLUMNS: &str = "id, user_id, subdomain, title, status, created_at";

fn map_row(row: &Row<'_>) -> rusqlite::Result<WebsiteRow> {
    Ok(WebsiteRow {
        id: WebsiteId::from_raw(row.get::<_, String>(0)?),
        user_id: UserId::from_raw(row.get::<_, String>(1)?),
        subdomain: row.get(2)?,
        title: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[derive(Clone)]
pub struct WebsiteRepo {
    db: Database,
}

impl WebsiteRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, website), fields(user_id = %website.user_id, subdomain = website.subdomain))]
    pub fn create(&self, website: &NewWebsite<'_>) -> Result<WebsiteRow, StoreError> {
        let row = WebsiteRow {
            id: WebsiteId::from_raw(Uuid::new_v4().to_string()),
            user_id: website.user_id.clone(),
            subdomain: website.subdomain.to_owned(),
            title: website.title.to_owned(),
            status: "draft".to_owned(),
            created_at: Utc::now().to_rfc3339(),
        };
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO websites (id, user_id, subdomain, title, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    row.id.as_str(),
                    row.user_id.as_str(),
                    row.subdomain,
                    row.title,
                    row.status,
                    row.created_at
                ],
            )?;
            Ok(())
        })?;
        Ok(row)
    }

    #[instrument(skip(self), fields(website_id = %id))]
    pub fn get(&self, id: &WebsiteId) -> Result<WebsiteRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM websites WHERE id = ?1"),
                [id.as_str()],
                map_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("website {id}")))
        })
    }

    #[instrument(skip(self), fields(user_id = %user))]
    pub fn list_for_user(&self, user: &UserId) -> Result<Vec<WebsiteRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM websites WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC"
            ))?;
            let rows = stmt.query_map([user.as_str()], map_row)?;
            Ok(rows.collect::<Result<_, _>>()?)
        })
    }

    /// True when the website exists and belongs to `user`.
    #[instrument(skip(self), fields(user_id = %user, website_id = %website))]
    pub fn is_owned_by(&self, user: &UserId, website: &WebsiteId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM websites WHERE id = ?1 AND user_id = ?2",
                    [website.as_str(), user.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }
}

impl OwnershipCheck for WebsiteRepo {
    fn owns_website(&self, user: &UserId, website: &WebsiteId) -> Result<bool, ServiceError> {
        Ok(self.is_owned_by(user, website)?)
    }
}
