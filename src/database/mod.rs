pub mod schema;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::debug;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) a file-backed SQLite database.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        Self::connect(database_url, true).await
    }

    /// Open a database that must already exist.
    pub async fn open_existing(database_url: &str) -> Result<Self, sqlx::Error> {
        Self::connect(database_url, false).await
    }

    async fn connect(database_url: &str, create: bool) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        debug!("Connected to {}", database_url);
        Ok(Database { pool })
    }

    /// Single-connection in-memory database with the schema applied.
    /// The connection is pinned so the database lives as long as the pool.
    pub async fn new_in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let database = Database { pool };
        database.run_migrations().await?;
        Ok(database)
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(schema::LEDGER_SCHEMA)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
