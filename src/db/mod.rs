pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("songs table is missing required columns: {}", missing.join(", "))]
    Schema { missing: Vec<String> },
    #[error("{rows} rows have no cluster assignment (run `genrescope assign` first)")]
    Unassigned { rows: usize },
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Columns the analytics engine needs in the persisted corpus.
pub const REQUIRED_COLUMNS: &[&str] = &[
    "filename",
    "genre",
    "tempo",
    "energy",
    "loudness",
    "valence",
    "danceability",
    "kmeans_cluster",
    "pca_1",
    "pca_2",
    "pca_3d_1",
    "pca_3d_2",
    "pca_3d_3",
];

const SCHEMA_VERSION: i32 = 1;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        // WAL mode for better concurrent read performance
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version > SCHEMA_VERSION {
            return Err(DbError::Migration(format!(
                "database schema v{version} is newer than supported v{SCHEMA_VERSION}"
            )));
        }
        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// V1: songs table with features, cluster assignment, projection coordinates
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS songs (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                filename        TEXT NOT NULL,
                genre           TEXT NOT NULL,

                -- Extracted features
                tempo           REAL,
                energy          REAL,
                loudness        REAL,
                valence         REAL,
                danceability    REAL,

                -- Written by `assign` from the fitted models
                kmeans_cluster  INTEGER,
                pca_1           REAL,
                pca_2           REAL,
                pca_3d_1        REAL,
                pca_3d_2        REAL,
                pca_3d_3        REAL,

                UNIQUE(genre, filename)
            );

            CREATE INDEX IF NOT EXISTS idx_songs_genre ON songs(genre);
            CREATE INDEX IF NOT EXISTS idx_songs_cluster ON songs(kmeans_cluster);
            ",
        )?;
        Ok(())
    }

    /// Column names of the `songs` table, in table order.
    pub fn column_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM pragma_table_info('songs')")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Verify that every required column is present; lists all that are not.
    pub fn check_corpus_schema(&self) -> Result<()> {
        let present = self.column_names()?;
        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|c| !present.iter().any(|p| p == *c))
            .map(|c| c.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DbError::Schema { missing })
        }
    }
}
