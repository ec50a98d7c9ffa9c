//! Connection pool setup. Runtime `sqlx::query`/`query_as` are used
//! throughout rather than the `sqlx::query!` compile-time macro, since
//! there is no live database available at build time to generate the
//! offline query cache the macro needs.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

use crate::error::PmlResult;

use super::schema::SCHEMA;

pub async fn connect(database_url: &str, max_connections: u32) -> PmlResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| crate::error::PmlError::Configuration(format!("bad database url: {e}")))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(statement).execute(&pool).await?;
    }

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connects_and_applies_schema_to_in_memory_db() {
        let pool = connect("sqlite::memory:", 1).await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM capabilities")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }
}
