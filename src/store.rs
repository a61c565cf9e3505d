//! Durable watchlist storage.
//!
//! One SQLite table keyed by `(user_id, steam_app_id)`. Every write is a single
//! statement, so readers see either the old or the new record and `list_all`
//! reads one consistent snapshot.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{FromRow, Pool, Sqlite};
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::types::{ChannelId, UserId, WatchEntry};

const CREATE_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS watchlist (
        user_id INTEGER NOT NULL,
        steam_app_id TEXT NOT NULL,
        game_title TEXT,
        channel_id INTEGER NOT NULL,
        target_price TEXT,
        region TEXT NOT NULL DEFAULT 'us',
        added_at TEXT NOT NULL,
        PRIMARY KEY (user_id, steam_app_id)
    )
";

/// Columns are cast to the types `WatchRow` expects, so rows written by older
/// versions of the bot (a REAL `target_price`, a NULL region) still decode.
const SELECT_COLUMNS: &str = r"
    SELECT user_id, steam_app_id, CAST(game_title AS TEXT) AS game_title, channel_id,
           CAST(target_price AS TEXT) AS target_price, COALESCE(region, 'us') AS region,
           CAST(added_at AS TEXT) AS added_at
    FROM watchlist";

/// Raw row as stored. Identifiers are reinterpreted between `u64` and SQLite's
/// signed 64-bit integers, which round-trips every value.
#[derive(Debug, sqlx::FromRow)]
struct WatchRow {
    user_id: i64,
    steam_app_id: String,
    game_title: Option<String>,
    channel_id: i64,
    target_price: Option<String>,
    region: String,
    added_at: String,
}

impl TryFrom<WatchRow> for WatchEntry {
    type Error = StorageError;

    #[allow(clippy::cast_sign_loss)]
    fn try_from(row: WatchRow) -> Result<Self, Self::Error> {
        let target_price = row
            .target_price
            .as_deref()
            .map(|raw| Decimal::from_str(raw).or_else(|_| Decimal::from_scientific(raw)))
            .transpose()
            .map_err(|e| {
                StorageError::Corrupt(format!(
                    "target_price for ({}, {}): {e}",
                    row.user_id, row.steam_app_id
                ))
            })?;
        let added_at = parse_added_at(&row.added_at).ok_or_else(|| {
            StorageError::Corrupt(format!(
                "added_at for ({}, {}): {:?}",
                row.user_id, row.steam_app_id, row.added_at
            ))
        })?;

        Ok(WatchEntry {
            user_id: UserId(row.user_id as u64),
            game_id: row.steam_app_id,
            title: row.game_title.unwrap_or_default(),
            channel_id: ChannelId(row.channel_id as u64),
            target_price,
            region: row.region,
            added_at,
        })
    }
}

/// RFC 3339, or a naive `YYYY-MM-DDTHH:MM:SS[.ffffff]` read as UTC.
fn parse_added_at(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Decode each row on its own. Rows that cannot be decoded are logged and
/// counted, never fatal for the rest.
fn decode_rows(rows: &[SqliteRow]) -> Listing {
    let mut listing = Listing::default();
    for row in rows {
        let decoded = WatchRow::from_row(row)
            .map_err(|e| StorageError::Corrupt(e.to_string()))
            .and_then(WatchEntry::try_from);
        match decoded {
            Ok(entry) => listing.entries.push(entry),
            Err(e) => {
                warn!("Skipping watchlist row: {e}");
                listing.skipped += 1;
            }
        }
    }
    listing
}

/// Result of a table scan.
#[derive(Debug, Default)]
pub struct Listing {
    pub entries: Vec<WatchEntry>,
    /// Rows left out because they could not be decoded.
    pub skipped: usize,
}

#[allow(clippy::cast_possible_wrap)]
fn sql_id(id: u64) -> i64 {
    id as i64
}

/// Handle to the watchlist table. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct WatchlistStore {
    pool: Pool<Sqlite>,
}

impl WatchlistStore {
    /// Open (or create) the watchlist database at the given file path.
    ///
    /// Creates the parent directory if needed, enables WAL mode and a 5-second
    /// busy timeout, and creates the table when it is missing.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(path = %path.display(), "Watchlist database opened");
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        // A single connection that never idles out, so the in-memory database
        // lives as long as the pool.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    /// Insert the entry, or fully replace the existing one for the same
    /// `(user_id, game_id)`.
    pub async fn upsert(&self, entry: &WatchEntry) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT OR REPLACE INTO watchlist
                (user_id, steam_app_id, game_title, channel_id, target_price, region, added_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(sql_id(entry.user_id.0))
        .bind(&entry.game_id)
        .bind(&entry.title)
        .bind(sql_id(entry.channel_id.0))
        .bind(entry.target_price.map(|p| p.to_string()))
        .bind(&entry.region)
        .bind(entry.added_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(user = %entry.user_id, game = %entry.game_id, "Watch entry upserted");
        Ok(())
    }

    /// Delete the entry if present. Returns whether a record existed.
    pub async fn remove(&self, user_id: UserId, game_id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM watchlist WHERE user_id = ? AND steam_app_id = ?")
            .bind(sql_id(user_id.0))
            .bind(game_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All decodable entries for one user, oldest first.
    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<WatchEntry>, StorageError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE user_id = ? ORDER BY added_at, steam_app_id"
        ))
        .bind(sql_id(user_id.0))
        .fetch_all(&self.pool)
        .await?;
        Ok(decode_rows(&rows).entries)
    }

    /// Every decodable entry in the table.
    pub async fn list_all(&self) -> Result<Vec<WatchEntry>, StorageError> {
        Ok(self.scan_all().await?.entries)
    }

    /// Every entry in the table, read in one statement, plus the number of
    /// rows that could not be decoded.
    pub async fn scan_all(&self) -> Result<Listing, StorageError> {
        let rows = sqlx::query(SELECT_COLUMNS).fetch_all(&self.pool).await?;
        Ok(decode_rows(&rows))
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close the pool, waiting for open connections to finish.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
