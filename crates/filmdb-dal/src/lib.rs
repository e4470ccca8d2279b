pub mod attachment;
pub mod error;
pub mod film;
pub mod genre;

use std::fmt::Display;
use std::str::FromStr as _;

pub use error::Error;
pub use sqlx::Error as SqlxError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::error::Result;

pub type ChosenDB = sqlx::Sqlite;
pub type Pool = sqlx::Pool<ChosenDB>;

pub const MAX_LIMIT: usize = 10_000;

/// Opens a pool with foreign keys enforced on every connection, so that
/// attachment and relation rows cannot reference missing records.
pub async fn new_pool(database_url: &str) -> Result<Pool, Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(50)
        .connect_with(options)
        .await?;
    Ok(pool)
}

#[derive(Debug, Clone)]
pub enum Order {
    Asc(String),
    Desc(String),
}

impl Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Order::Asc(s) => write!(f, "{}", s),
            Order::Desc(s) => write!(f, "{} DESC", s),
        }
    }
}

impl AsRef<str> for Order {
    fn as_ref(&self) -> &str {
        match self {
            Order::Asc(s) => s.as_str(),
            Order::Desc(s) => s.as_str(),
        }
    }
}

pub struct ListingParams {
    pub offset: i64,
    pub limit: i64,
    pub order: Option<Vec<Order>>,
}

impl Default for ListingParams {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: MAX_LIMIT as i64,
            order: None,
        }
    }
}

impl ListingParams {
    pub fn new(offset: i64, limit: i64) -> Self {
        Self {
            offset,
            limit,
            order: None,
        }
    }
    pub fn with_order(mut self, order: Vec<Order>) -> Self {
        self.order = Some(order);
        self
    }

    /// Resolves the ORDER BY expression, falling back to the entity default
    /// when no explicit order was requested.
    pub fn ordering(&self, valid_fields: &[&str], default_order: &str) -> Result<String> {
        let ordering = self
            .order
            .as_ref()
            .map(|o| {
                o.iter()
                    .map(|o| {
                        if valid_fields.contains(&o.as_ref()) {
                            Ok(o.to_string())
                        } else {
                            Err(Error::InvalidOrderByField(o.as_ref().to_string()))
                        }
                    })
                    .collect::<Result<Vec<String>>>()
                    .map(|o| o.join(", "))
            })
            .transpose()?
            .filter(|o| !o.is_empty())
            .unwrap_or_else(|| default_order.to_string());
        Ok(ordering)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        let params = ListingParams::default();
        let order = params.ordering(&["id", "name"], "name").unwrap();
        assert_eq!(order, "name");

        let params = ListingParams::default().with_order(vec![
            Order::Desc("name".to_string()),
            Order::Asc("id".to_string()),
        ]);
        let order = params.ordering(&["id", "name"], "name").unwrap();
        assert_eq!(order, "name DESC, id");

        let params =
            ListingParams::default().with_order(vec![Order::Asc("password".to_string())]);
        let res = params.ordering(&["id", "name"], "name");
        assert!(matches!(res, Err(Error::InvalidOrderByField(f)) if f == "password"));
    }
}
