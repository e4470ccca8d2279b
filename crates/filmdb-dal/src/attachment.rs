use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use futures::{StreamExt as _, TryStreamExt as _};
use garde::Validate;
use serde::{Deserialize, Serialize};
use sqlx::Pool;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::{Error, ListingParams, error::Result};

pub const VALID_ORDER_FIELDS: &[&str] = &["id", "title", "last_update", "type"];
const DEFAULT_ORDER: &str = "last_update DESC, type";

/// Kind of an attached file. Stored as lowercase text; the enum is the only
/// way to express a kind, so membership needs no runtime check.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AttachmentType {
    Audio,
    #[default]
    Image,
    Text,
    Video,
    Other,
}

impl AttachmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentType::Audio => "audio",
            AttachmentType::Image => "image",
            AttachmentType::Text => "text",
            AttachmentType::Video => "video",
            AttachmentType::Other => "other",
        }
    }
}

impl Display for AttachmentType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown attachment type: {0}")]
pub struct UnknownAttachmentType(String);

impl FromStr for AttachmentType {
    type Err = UnknownAttachmentType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(AttachmentType::Audio),
            "image" => Ok(AttachmentType::Image),
            "text" => Ok(AttachmentType::Text),
            "video" => Ok(AttachmentType::Video),
            "other" => Ok(AttachmentType::Other),
            _ => Err(UnknownAttachmentType(s.to_string())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct CreateAttachment {
    #[garde(length(min = 1, max = 200))]
    pub title: String,
    #[garde(skip)]
    pub film_id: i64,
    /// Defaults to [`AttachmentType::Image`] when not given.
    #[garde(skip)]
    #[serde(rename = "type", default)]
    pub kind: Option<AttachmentType>,
    #[garde(skip)]
    pub file_path: Option<String>,
}

#[derive(Debug, Serialize, Clone, sqlx::FromRow)]
pub struct Attachment {
    pub id: i64,
    pub title: String,
    /// Stamped from the clock on every create and update, caller input
    /// never wins.
    pub last_update: PrimitiveDateTime,
    pub file_path: Option<String>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: AttachmentType,
    pub film_id: i64,
}

impl Display for Attachment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.title, self.kind)
    }
}

fn now() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

pub type AttachmentRepository = AttachmentRepositoryImpl<Pool<crate::ChosenDB>>;

pub struct AttachmentRepositoryImpl<E> {
    executor: E,
}

impl<'c, E> AttachmentRepositoryImpl<E>
where
    for<'a> &'a E: sqlx::Executor<'c, Database = crate::ChosenDB>,
{
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub async fn create(&self, payload: CreateAttachment) -> Result<Attachment> {
        payload.validate()?;
        let result = sqlx::query(
            "INSERT INTO attachment (title, last_update, file_path, type, film_id) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&payload.title)
        .bind(now())
        .bind(&payload.file_path)
        .bind(payload.kind.unwrap_or_default())
        .bind(payload.film_id)
        .execute(&self.executor)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                Error::MissingReference("Film")
            }
            _ => Error::from(e),
        })?;

        let id = result.last_insert_rowid();
        self.get(id).await
    }

    pub async fn update(&self, id: i64, payload: CreateAttachment) -> Result<Attachment> {
        payload.validate()?;
        let result = sqlx::query(
            "UPDATE attachment SET title = ?, last_update = ?, file_path = ?, type = ?, film_id = ? WHERE id = ?",
        )
        .bind(&payload.title)
        .bind(now())
        .bind(&payload.file_path)
        .bind(payload.kind.unwrap_or_default())
        .bind(payload.film_id)
        .bind(id)
        .execute(&self.executor)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                Error::MissingReference("Film")
            }
            _ => Error::from(e),
        })?;

        if result.rows_affected() == 0 {
            Err(Error::RecordNotFound("Attachment".to_string()))
        } else {
            self.get(id).await
        }
    }

    pub async fn list(&self, params: ListingParams) -> Result<Vec<Attachment>> {
        let order = params.ordering(VALID_ORDER_FIELDS, DEFAULT_ORDER)?;
        let records = sqlx::query_as::<_, Attachment>(&format!(
            "SELECT id, title, last_update, file_path, type, film_id FROM attachment ORDER BY {order} LIMIT ? OFFSET ?"
        ))
        .bind(params.limit)
        .bind(params.offset)
        .fetch(&self.executor)
        .take(crate::MAX_LIMIT)
        .try_collect::<Vec<_>>()
        .await?;
        Ok(records)
    }

    /// Removes the record and returns its stored file path, if any, so the
    /// caller can drop the blob as well.
    pub async fn delete(&self, id: i64) -> Result<Option<String>> {
        let existing: Option<Option<String>> =
            sqlx::query_scalar("SELECT file_path FROM attachment WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.executor)
                .await?;
        match existing {
            None => Err(Error::RecordNotFound("Attachment".to_string())),
            Some(file_path) => {
                sqlx::query("DELETE FROM attachment WHERE id = ?")
                    .bind(id)
                    .execute(&self.executor)
                    .await?;
                Ok(file_path)
            }
        }
    }

    pub async fn get(&self, id: i64) -> Result<Attachment> {
        let record = sqlx::query_as::<_, Attachment>(
            "SELECT id, title, last_update, file_path, type, film_id FROM attachment WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.executor)
        .await?
        .ok_or_else(|| Error::RecordNotFound("Attachment".to_string()))?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_parsing() {
        assert_eq!("video".parse::<AttachmentType>().unwrap(), AttachmentType::Video);
        assert_eq!(AttachmentType::default(), AttachmentType::Image);
        assert!("podcast".parse::<AttachmentType>().is_err());
        assert!("Image".parse::<AttachmentType>().is_err());
    }

    #[test]
    fn test_label() {
        let attachment = Attachment {
            id: 1,
            title: "Plakát".to_string(),
            last_update: now(),
            file_path: None,
            kind: AttachmentType::Image,
            film_id: 1,
        };
        assert_eq!(attachment.to_string(), "Plakát (image)");
    }
}
