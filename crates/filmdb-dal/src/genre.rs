use futures::{StreamExt as _, TryStreamExt as _};
use garde::Validate;
use serde::{Deserialize, Serialize};
use sqlx::{Acquire as _, Pool};
use tracing::debug;

use crate::{Error, ListingParams, error::Result};

pub const VALID_ORDER_FIELDS: &[&str] = &["id", "name"];
const DEFAULT_ORDER: &str = "name";

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct CreateGenre {
    #[garde(length(min = 1, max = 50))]
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

impl std::fmt::Display for Genre {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

pub type GenreRepository = GenreRepositoryImpl<Pool<crate::ChosenDB>>;

pub struct GenreRepositoryImpl<E> {
    executor: E,
}

impl<'c, E> GenreRepositoryImpl<E>
where
    for<'a> &'a E:
        sqlx::Executor<'c, Database = crate::ChosenDB> + sqlx::Acquire<'c, Database = crate::ChosenDB>,
{
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub async fn create(&self, payload: CreateGenre) -> Result<Genre> {
        payload.validate()?;
        let result = sqlx::query("INSERT INTO genre (name) VALUES (?)")
            .bind(&payload.name)
            .execute(&self.executor)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => Error::AlreadyExists {
                    entity: "Genre",
                    field: "name",
                },
                _ => Error::from(e),
            })?;

        let id = result.last_insert_rowid();
        self.get(id).await
    }

    pub async fn update(&self, id: i64, payload: CreateGenre) -> Result<Genre> {
        payload.validate()?;
        let result = sqlx::query("UPDATE genre SET name = ? WHERE id = ?")
            .bind(&payload.name)
            .bind(id)
            .execute(&self.executor)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => Error::AlreadyExists {
                    entity: "Genre",
                    field: "name",
                },
                _ => Error::from(e),
            })?;

        if result.rows_affected() == 0 {
            Err(Error::RecordNotFound("Genre".to_string()))
        } else {
            self.get(id).await
        }
    }

    pub async fn list(&self, params: ListingParams) -> Result<Vec<Genre>> {
        let order = params.ordering(VALID_ORDER_FIELDS, DEFAULT_ORDER)?;
        let records = sqlx::query_as::<_, Genre>(&format!(
            "SELECT id, name FROM genre ORDER BY {order} LIMIT ? OFFSET ?"
        ))
        .bind(params.limit)
        .bind(params.offset)
        .fetch(&self.executor)
        .take(crate::MAX_LIMIT)
        .try_collect::<Vec<_>>()
        .await?;
        Ok(records)
    }

    /// Deleting a genre detaches it from films, the films themselves are
    /// kept. Both steps happen in one transaction.
    pub async fn delete(&self, id: i64) -> Result<()> {
        let mut conn = self.executor.acquire().await?;
        let mut tx = conn.begin().await?;

        sqlx::query("DELETE FROM film_genres WHERE genre_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let res = sqlx::query("DELETE FROM genre WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if res.rows_affected() == 0 {
            return Err(Error::RecordNotFound("Genre".to_string()));
        }
        tx.commit().await?;
        debug!("Deleted genre {id}");
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Genre> {
        let record = sqlx::query_as::<_, Genre>("SELECT id, name FROM genre WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.executor)
            .await?
            .ok_or_else(|| Error::RecordNotFound("Genre".to_string()))?;
        Ok(record)
    }
}
