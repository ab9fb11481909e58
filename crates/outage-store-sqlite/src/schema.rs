//! SQL schema for the outage star schema.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS dim_geography (
    geography_id INTEGER PRIMARY KEY AUTOINCREMENT,
    region       TEXT NOT NULL,
    comuna       TEXT NOT NULL,
    UNIQUE (region, comuna)
);

CREATE TABLE IF NOT EXISTS dim_company (
    company_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL UNIQUE
);

-- Populated ahead of time (see SqliteStore::seed_time_dimension).
-- time_id is the date as YYYYMMDD.
CREATE TABLE IF NOT EXISTS dim_time (
    time_id INTEGER PRIMARY KEY,
    date    TEXT    NOT NULL UNIQUE,   -- YYYY-MM-DD
    year    INTEGER NOT NULL,
    month   INTEGER NOT NULL,
    day     INTEGER NOT NULL,
    weekday INTEGER NOT NULL           -- 1 = Monday
);

-- Append-only. A content_id is written at most once.
CREATE TABLE IF NOT EXISTS fact_outages (
    fact_id            INTEGER PRIMARY KEY AUTOINCREMENT,
    content_id         TEXT    NOT NULL UNIQUE,
    geography_id       INTEGER NOT NULL REFERENCES dim_geography(geography_id),
    company_id         INTEGER NOT NULL REFERENCES dim_company(company_id),
    time_id            INTEGER NOT NULL REFERENCES dim_time(time_id),
    affected_customers INTEGER NOT NULL,
    incident_time      TEXT    NOT NULL,   -- HH:MM
    server_timestamp   TEXT    NOT NULL,   -- YYYY-MM-DD HH:MM:SS
    incident_date_str  TEXT    NOT NULL,   -- as reported upstream
    staleness_raw      TEXT    NOT NULL,
    recorded_at        TEXT    NOT NULL    -- RFC 3339 UTC; store-assigned
);

CREATE INDEX IF NOT EXISTS fact_outages_time_idx      ON fact_outages(time_id);
CREATE INDEX IF NOT EXISTS fact_outages_geography_idx ON fact_outages(geography_id);
CREATE INDEX IF NOT EXISTS fact_outages_company_idx   ON fact_outages(company_id);

PRAGMA user_version = 1;
";

/// Columns bound per fact row in the batched insert.
pub const FACT_COLUMNS: usize = 10;

/// Rows per multi-row INSERT statement, keeping the bound parameter count
/// well under SQLite's limit.
pub const FACT_ROWS_PER_STATEMENT: usize = 500;
