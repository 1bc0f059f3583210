use crate::domain::StoreDim;
use crate::error::Result;
use crate::pipeline::batch::SourceMetadata;
use crate::pipeline::RefState;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// The dimensional store: dimensions, facts, audit tables and the delta-load
/// fingerprint registry, all in one SQLite database. The cross-functional
/// store surface is the `dim_store_crm` view, a filtered projection of
/// `dim_store`, so there is one physical dimension and no dual write.
pub struct CdmStore {
    conn: Connection,
}

const SCHEMA: &str = r#"
PRAGMA journal_mode=WAL;
CREATE TABLE IF NOT EXISTS dim_store (
    unique_store_id TEXT PRIMARY KEY,
    store_id        TEXT NOT NULL,
    country         TEXT NOT NULL,
    customer_id     TEXT NOT NULL,
    store_name      TEXT NOT NULL DEFAULT '',
    street          TEXT NOT NULL DEFAULT '',
    house_number    TEXT NOT NULL DEFAULT '',
    zip_code        TEXT NOT NULL DEFAULT '',
    city            TEXT NOT NULL DEFAULT '',
    banner_name     TEXT NOT NULL DEFAULT '',
    crm_qualified   INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);
CREATE VIEW IF NOT EXISTS dim_store_crm AS
    SELECT * FROM dim_store WHERE crm_qualified = 1;
CREATE TABLE IF NOT EXISTS dim_product (
    retailer_sku  TEXT PRIMARY KEY,
    reference_sku TEXT NOT NULL,
    unmapped      INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS sku_mapping (
    retailer_sku  TEXT PRIMARY KEY,
    reference_sku TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS dim_time (
    week_key TEXT PRIMARY KEY,
    iso_year INTEGER NOT NULL,
    iso_week INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS fact_offtake (
    fact_id          TEXT PRIMARY KEY,
    unique_store_id  TEXT NOT NULL,
    retailer_sku     TEXT NOT NULL,
    reference_sku    TEXT NOT NULL,
    week_key         TEXT NOT NULL,
    data_provider    TEXT NOT NULL,
    volume           REAL NOT NULL,
    value            REAL NOT NULL,
    volume_promo     REAL NOT NULL,
    volume_non_promo REAL NOT NULL,
    value_promo      REAL NOT NULL,
    value_non_promo  REAL NOT NULL,
    currency         TEXT,
    loaded_at        TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS audit_file (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    file_name        TEXT NOT NULL,
    fingerprint      TEXT NOT NULL,
    country          TEXT NOT NULL,
    file_type        TEXT NOT NULL,
    customer_id      TEXT NOT NULL,
    status           TEXT NOT NULL,
    records_total    INTEGER NOT NULL,
    records_accepted INTEGER NOT NULL,
    records_rejected INTEGER NOT NULL,
    recorded_at      TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS audit_check (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint TEXT NOT NULL,
    seq         INTEGER NOT NULL,
    check_name  TEXT NOT NULL,
    passed      INTEGER NOT NULL,
    details     TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS file_fingerprints (
    fingerprint TEXT PRIMARY KEY,
    file_name   TEXT NOT NULL,
    loaded_at   TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS load_baseline (
    country      TEXT NOT NULL,
    file_type    TEXT NOT NULL,
    customer_id  TEXT NOT NULL,
    total_volume REAL NOT NULL,
    PRIMARY KEY (country, file_type, customer_id)
);
"#;

impl CdmStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Delta-load check: has this exact content been loaded before?
    pub fn fingerprint_seen(&self, fingerprint: &str) -> Result<bool> {
        let seen: Option<String> = self
            .conn
            .query_row(
                "SELECT fingerprint FROM file_fingerprints WHERE fingerprint = ?1",
                params![fingerprint],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seen.is_some())
    }

    /// Loads the shared reference state for one run: known stores for the
    /// batch's (country, customer), the full SKU mapping, and the volume
    /// baseline of the last accepted load for the same key. Explicit state,
    /// never process-global.
    pub fn reference_state(&self, meta: &SourceMetadata) -> Result<RefState> {
        let mut state = RefState::default();

        let mut stmt = self.conn.prepare(
            "SELECT unique_store_id, store_id, country, customer_id, store_name, street,
                    house_number, zip_code, city, banner_name, crm_qualified, created_at, updated_at
             FROM dim_store WHERE country = ?1 AND customer_id = ?2",
        )?;
        let rows = stmt.query_map(params![meta.country, meta.customer_id], row_to_store)?;
        for row in rows {
            let store = row?;
            state.known_stores.insert(store.unique_store_id.clone(), store);
        }

        let mut stmt = self
            .conn
            .prepare("SELECT retailer_sku, reference_sku FROM sku_mapping")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (retailer, reference) = row?;
            state.sku_map.insert(retailer, reference);
        }

        state.volume_baseline = self
            .conn
            .query_row(
                "SELECT total_volume FROM load_baseline
                 WHERE country = ?1 AND file_type = ?2 AND customer_id = ?3",
                params![meta.country, meta.file_type, meta.customer_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(state)
    }

    /// Curated SKU mapping maintenance (CLI `map-sku`).
    pub fn upsert_sku_mapping(&self, retailer_sku: &str, reference_sku: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sku_mapping (retailer_sku, reference_sku) VALUES (?1, ?2)
             ON CONFLICT(retailer_sku) DO UPDATE SET reference_sku=excluded.reference_sku",
            params![retailer_sku, reference_sku],
        )?;
        Ok(())
    }

    // Read accessors for the reporting collaborators and tests.

    pub fn store(&self, unique_store_id: &str) -> Result<Option<StoreDim>> {
        let store = self
            .conn
            .query_row(
                "SELECT unique_store_id, store_id, country, customer_id, store_name, street,
                        house_number, zip_code, city, banner_name, crm_qualified, created_at, updated_at
                 FROM dim_store WHERE unique_store_id = ?1",
                params![unique_store_id],
                row_to_store,
            )
            .optional()?;
        Ok(store)
    }

    pub fn store_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM dim_store", [], |row| row.get(0))?)
    }

    /// Count through the cross-functional projection only.
    pub fn crm_store_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM dim_store_crm", [], |row| row.get(0))?)
    }

    pub fn fact_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM fact_offtake", [], |row| row.get(0))?)
    }

    pub fn file_audit_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM audit_file", [], |row| row.get(0))?)
    }

    pub fn check_audit_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM audit_check", [], |row| row.get(0))?)
    }

    pub fn last_file_audit_status(&self) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT status FROM audit_file ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?)
    }
}

fn row_to_store(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoreDim> {
    let created: String = row.get(11)?;
    let updated: String = row.get(12)?;
    Ok(StoreDim {
        unique_store_id: row.get(0)?,
        store_id: row.get(1)?,
        country: row.get(2)?,
        customer_id: row.get(3)?,
        store_name: row.get(4)?,
        street: row.get(5)?,
        house_number: row.get(6)?,
        zip_code: row.get(7)?,
        city: row.get(8)?,
        banner_name: row.get(9)?,
        crm_qualified: row.get::<_, i64>(10)? != 0,
        created_at: parse_ts(&created),
        updated_at: parse_ts(&updated),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
