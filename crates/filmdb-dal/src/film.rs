use std::fmt::{self, Display, Formatter};

use futures::{StreamExt as _, TryStreamExt as _};
use garde::Validate;
use serde::{Deserialize, Serialize};
use sqlx::{Acquire as _, Pool};
use time::Date;
use tracing::debug;

use crate::{Error, ListingParams, error::Result, genre::Genre};

pub const VALID_ORDER_FIELDS: &[&str] = &["id", "title", "release_date", "runtime", "rating"];
// SQLite sorts NULL as the lowest value, so films without a release date
// come last under the descending date order.
const DEFAULT_ORDER: &str = "release_date DESC, title";

pub const DEFAULT_RATING: f64 = 5.0;

const FORBIDDEN_TITLE_START: &str = "+-*/%&;:.,";

fn title_start(value: &str, _context: &()) -> garde::Result {
    match value.chars().next() {
        Some(c) if FORBIDDEN_TITLE_START.contains(c) => Err(garde::Error::new(format!(
            "must not start with any of {FORBIDDEN_TITLE_START}"
        ))),
        _ => Ok(()),
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct CreateFilm {
    #[garde(length(min = 2, max = 200), custom(title_start))]
    pub title: String,
    #[garde(skip)]
    pub plot: Option<String>,
    #[garde(skip)]
    pub release_date: Option<Date>,
    #[garde(skip)]
    pub runtime: Option<u32>,
    /// Intended range is 0.0 - 10.0, advisory only and not validated.
    #[garde(skip)]
    pub rating: Option<f64>,
    /// Genre ids. On update `None` leaves the genre set untouched, a value
    /// replaces it.
    #[garde(skip)]
    pub genres: Option<Vec<i64>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct FilmShort {
    pub id: i64,
    pub title: String,
    pub release_date: Option<Date>,
    pub runtime: Option<u32>,
    pub rating: Option<f64>,
}

#[derive(Debug, Serialize, Clone)]
pub struct Film {
    pub id: i64,
    pub title: String,
    pub plot: Option<String>,
    pub release_date: Option<Date>,
    pub runtime: Option<u32>,
    pub rating: Option<f64>,
    pub genres: Vec<Genre>,
}

// A film may legally have no release date; the label renders a placeholder
// year instead of failing.
fn film_label(
    f: &mut Formatter<'_>,
    title: &str,
    release_date: Option<Date>,
    rating: Option<f64>,
) -> fmt::Result {
    write!(f, "{title} (")?;
    match release_date {
        Some(date) => write!(f, "{}", date.year())?,
        None => f.write_str("?")?,
    }
    f.write_str("), hodnocení: ")?;
    match rating {
        Some(rating) => write!(f, "{rating}"),
        None => f.write_str("-"),
    }
}

impl Display for Film {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        film_label(f, &self.title, self.release_date, self.rating)
    }
}

impl Display for FilmShort {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        film_label(f, &self.title, self.release_date, self.rating)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FilmRow {
    id: i64,
    title: String,
    plot: Option<String>,
    release_date: Option<Date>,
    runtime: Option<u32>,
    rating: Option<f64>,
}

pub type FilmRepository = FilmRepositoryImpl<Pool<crate::ChosenDB>>;

pub struct FilmRepositoryImpl<E> {
    executor: E,
}

impl<'c, E> FilmRepositoryImpl<E>
where
    for<'a> &'a E:
        sqlx::Executor<'c, Database = crate::ChosenDB> + sqlx::Acquire<'c, Database = crate::ChosenDB>,
{
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub async fn create(&self, payload: CreateFilm) -> Result<Film> {
        payload.validate()?;
        let mut conn = self.executor.acquire().await?;
        let mut tx = conn.begin().await?;

        let result = sqlx::query(
            "INSERT INTO film (title, plot, release_date, runtime, rating) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&payload.title)
        .bind(&payload.plot)
        .bind(payload.release_date)
        .bind(payload.runtime)
        .bind(payload.rating.unwrap_or(DEFAULT_RATING))
        .execute(&mut *tx)
        .await?;

        let id = result.last_insert_rowid();
        replace_genres(&mut *tx, id, payload.genres.as_deref().unwrap_or(&[])).await?;
        let film = fetch_film(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(film)
    }

    pub async fn update(&self, id: i64, payload: CreateFilm) -> Result<Film> {
        payload.validate()?;
        let mut conn = self.executor.acquire().await?;
        let mut tx = conn.begin().await?;

        let result = sqlx::query(
            "UPDATE film SET title = ?, plot = ?, release_date = ?, runtime = ?, rating = ? WHERE id = ?",
        )
        .bind(&payload.title)
        .bind(&payload.plot)
        .bind(payload.release_date)
        .bind(payload.runtime)
        .bind(payload.rating.unwrap_or(DEFAULT_RATING))
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::RecordNotFound("Film".to_string()));
        }
        if let Some(genres) = payload.genres.as_deref() {
            replace_genres(&mut *tx, id, genres).await?;
        }
        let film = fetch_film(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(film)
    }

    pub async fn list(&self, params: ListingParams) -> Result<Vec<FilmShort>> {
        let order = params.ordering(VALID_ORDER_FIELDS, DEFAULT_ORDER)?;
        let records = sqlx::query_as::<_, FilmShort>(&format!(
            "SELECT id, title, release_date, runtime, rating FROM film ORDER BY {order} LIMIT ? OFFSET ?"
        ))
        .bind(params.limit)
        .bind(params.offset)
        .fetch(&self.executor)
        .take(crate::MAX_LIMIT)
        .try_collect::<Vec<_>>()
        .await?;
        Ok(records)
    }

    /// Deletes the film together with its attachments and relation rows in
    /// one transaction, so readers never observe a film without its
    /// attachments or the reverse. Returns the stored file paths of the
    /// removed attachments so the caller can drop the blobs.
    pub async fn delete(&self, id: i64) -> Result<Vec<String>> {
        let mut conn = self.executor.acquire().await?;
        let mut tx = conn.begin().await?;

        let orphaned: Vec<String> = sqlx::query_scalar(
            "SELECT file_path FROM attachment WHERE film_id = ? AND file_path IS NOT NULL",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM attachment WHERE film_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM film_genres WHERE film_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let res = sqlx::query("DELETE FROM film WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if res.rows_affected() == 0 {
            return Err(Error::RecordNotFound("Film".to_string()));
        }
        tx.commit().await?;
        debug!(
            "Deleted film {id} and {} attachment files",
            orphaned.len()
        );
        Ok(orphaned)
    }

    pub async fn get(&self, id: i64) -> Result<Film> {
        let mut conn = self.executor.acquire().await?;
        fetch_film(&mut *conn, id).await
    }
}

/// Replaces the film's genre set. Duplicate ids in the payload collapse to
/// one relation row.
async fn replace_genres(
    conn: &mut sqlx::SqliteConnection,
    film_id: i64,
    genres: &[i64],
) -> Result<()> {
    sqlx::query("DELETE FROM film_genres WHERE film_id = ?")
        .bind(film_id)
        .execute(&mut *conn)
        .await?;
    for genre_id in genres {
        sqlx::query("INSERT OR IGNORE INTO film_genres (film_id, genre_id) VALUES (?, ?)")
            .bind(film_id)
            .bind(genre_id)
            .execute(&mut *conn)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                    Error::MissingReference("Genre")
                }
                _ => Error::from(e),
            })?;
    }
    Ok(())
}

async fn fetch_film(conn: &mut sqlx::SqliteConnection, id: i64) -> Result<Film> {
    let row = sqlx::query_as::<_, FilmRow>(
        "SELECT id, title, plot, release_date, runtime, rating FROM film WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| Error::RecordNotFound("Film".to_string()))?;

    let genres = sqlx::query_as::<_, Genre>(
        "SELECT g.id, g.name FROM genre g JOIN film_genres fg ON g.id = fg.genre_id WHERE fg.film_id = ? ORDER BY g.name",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Film {
        id: row.id,
        title: row.title,
        plot: row.plot,
        release_date: row.release_date,
        runtime: row.runtime,
        rating: row.rating,
        genres,
    })
}
