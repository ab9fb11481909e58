//! [`SqliteStore`]: the SQLite implementation of [`OutageStore`].

use std::{
  collections::{BTreeSet, HashMap},
  path::Path,
  sync::Arc,
};

use chrono::{Datelike, NaiveDate, Utc};
use rusqlite::{OptionalExtension as _, types::Value};

use outage_core::{
  record::{ContentId, FactRow, NormalizedRecord, SaveSummary},
  store::OutageStore,
};

use crate::{
  Result,
  dimension::DimensionCache,
  encode::{PendingFact, RawFactRow, encode_date, or_unknown, time_key},
  schema::{FACT_COLUMNS, FACT_ROWS_PER_STATEMENT, SCHEMA},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// An outage star schema backed by a single SQLite file.
///
/// Cloning is cheap. Clones share the connection and the dimension caches.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
  geography:       Arc<DimensionCache<(String, String)>>,
  company:         Arc<DimensionCache<String>>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::from_connection(conn).await
  }

  /// Open an in-memory store, mostly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::from_connection(conn).await
  }

  async fn from_connection(conn: tokio_rusqlite::Connection) -> Result<Self> {
    let store = Self {
      conn,
      geography: Arc::new(DimensionCache::new("geography")),
      company: Arc::new(DimensionCache::new("company")),
    };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Populate the time dimension for every date in `start..=end`. Dates
  /// already present are left alone. Returns the number of rows added.
  pub async fn seed_time_dimension(
    &self,
    start: NaiveDate,
    end: NaiveDate,
  ) -> Result<usize> {
    if start > end {
      return Err(outage_core::Error::InvalidRange { start, end }.into());
    }
    let rows: Vec<(i64, String, i32, u32, u32, u32)> = start
      .iter_days()
      .take_while(|d| *d <= end)
      .map(|d| {
        (
          time_key(d),
          encode_date(d),
          d.year(),
          d.month(),
          d.day(),
          d.weekday().number_from_monday(),
        )
      })
      .collect();

    let added = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut added = 0;
        {
          let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO dim_time (time_id, date, year, month, day, weekday)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          )?;
          for (id, date, year, month, day, weekday) in &rows {
            added += stmt
              .execute(rusqlite::params![id, date, year, month, day, weekday])?;
          }
        }
        tx.commit()?;
        Ok(added)
      })
      .await?;

    tracing::info!(%start, %end, added, "time dimension seeded");
    Ok(added)
  }

  pub async fn fact_count(&self) -> Result<usize> {
    self.count("SELECT COUNT(*) FROM fact_outages").await
  }

  pub async fn geography_count(&self) -> Result<usize> {
    self.count("SELECT COUNT(*) FROM dim_geography").await
  }

  pub async fn company_count(&self) -> Result<usize> {
    self.count("SELECT COUNT(*) FROM dim_company").await
  }

  async fn count(&self, sql: &'static str) -> Result<usize> {
    let n: i64 = self
      .conn
      .call(move |conn| Ok(conn.query_row(sql, [], |r| r.get(0))?))
      .await?;
    Ok(usize::try_from(n).unwrap_or(0))
  }

  pub async fn get_fact(&self, content_id: &ContentId) -> Result<Option<FactRow>> {
    let id = content_id.as_str().to_owned();

    let raw: Option<RawFactRow> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT content_id, geography_id, company_id, time_id,
                    affected_customers, incident_time, server_timestamp,
                    incident_date_str, staleness_raw
             FROM fact_outages WHERE content_id = ?1",
            rusqlite::params![id],
            |row| {
              Ok(RawFactRow {
                content_id:        row.get(0)?,
                geography_id:      row.get(1)?,
                company_id:        row.get(2)?,
                time_id:           row.get(3)?,
                affected:          row.get(4)?,
                incident_time:     row.get(5)?,
                server_timestamp:  row.get(6)?,
                incident_date_str: row.get(7)?,
                staleness_raw:     row.get(8)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawFactRow::into_fact).transpose()
  }

  /// Resolve time ids for every distinct date in one round trip.
  async fn time_ids(
    &self,
    dates: BTreeSet<NaiveDate>,
  ) -> Result<HashMap<NaiveDate, i64>> {
    let keyed: Vec<(NaiveDate, i64)> =
      dates.into_iter().map(|d| (d, time_key(d))).collect();

    let found = self
      .conn
      .call(move |conn| {
        let mut stmt =
          conn.prepare_cached("SELECT time_id FROM dim_time WHERE time_id = ?1")?;
        let mut found = HashMap::new();
        for (date, key) in keyed {
          let id: Option<i64> = stmt
            .query_row(rusqlite::params![key], |r| r.get(0))
            .optional()?;
          if let Some(id) = id {
            found.insert(date, id);
          }
        }
        Ok(found)
      })
      .await?;
    Ok(found)
  }

  async fn insert_facts(&self, facts: Vec<PendingFact>) -> Result<usize> {
    let recorded_at = Utc::now().to_rfc3339();

    let inserted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut inserted = 0;
        for chunk in facts.chunks(FACT_ROWS_PER_STATEMENT) {
          let sql = insert_sql(chunk.len());
          let mut values = Vec::with_capacity(chunk.len() * FACT_COLUMNS);
          for fact in chunk {
            values.extend([
              Value::Text(fact.content_id.clone()),
              Value::Integer(fact.geography_id),
              Value::Integer(fact.company_id),
              Value::Integer(fact.time_id),
              Value::Integer(fact.affected),
              Value::Text(fact.incident_time.clone()),
              Value::Text(fact.server_timestamp.clone()),
              Value::Text(fact.incident_date_str.clone()),
              Value::Text(fact.staleness_raw.clone()),
              Value::Text(recorded_at.clone()),
            ]);
          }
          inserted += tx.execute(&sql, rusqlite::params_from_iter(values))?;
        }
        // An early return above drops `tx`, which rolls the batch back.
        tx.commit()?;
        Ok(inserted)
      })
      .await?;
    Ok(inserted)
  }
}

fn insert_sql(rows: usize) -> String {
  let row = format!(
    "({})",
    (1..=FACT_COLUMNS).map(|_| "?").collect::<Vec<_>>().join(", ")
  );
  let values = vec![row; rows].join(",\n");
  format!(
    "INSERT INTO fact_outages (
       content_id, geography_id, company_id, time_id, affected_customers,
       incident_time, server_timestamp, incident_date_str, staleness_raw,
       recorded_at
     ) VALUES {values}
     ON CONFLICT (content_id) DO NOTHING"
  )
}

// ─── OutageStore impl ────────────────────────────────────────────────────────

impl OutageStore for SqliteStore {
  type Error = crate::Error;

  async fn get_or_create_geography(&self, region: &str, comuna: &str) -> Result<i64> {
    let key = (or_unknown(region), or_unknown(comuna));
    let conn = self.conn.clone();
    let (r, c) = key.clone();

    self
      .geography
      .get_or_create(key, || async move {
        let id = conn
          .call(move |conn| {
            let existing: Option<i64> = conn
              .query_row(
                "SELECT geography_id FROM dim_geography
                 WHERE region = ?1 AND comuna = ?2",
                rusqlite::params![r, c],
                |row| row.get(0),
              )
              .optional()?;
            if let Some(id) = existing {
              return Ok(id);
            }
            Ok(conn.query_row(
              "INSERT INTO dim_geography (region, comuna) VALUES (?1, ?2)
               ON CONFLICT (region, comuna) DO UPDATE SET region = excluded.region
               RETURNING geography_id",
              rusqlite::params![r, c],
              |row| row.get(0),
            )?)
          })
          .await?;
        Ok::<_, crate::Error>(id)
      })
      .await
  }

  async fn get_or_create_company(&self, name: &str) -> Result<i64> {
    let key = or_unknown(name);
    let conn = self.conn.clone();
    let n = key.clone();

    self
      .company
      .get_or_create(key, || async move {
        let id = conn
          .call(move |conn| {
            let existing: Option<i64> = conn
              .query_row(
                "SELECT company_id FROM dim_company WHERE name = ?1",
                rusqlite::params![n],
                |row| row.get(0),
              )
              .optional()?;
            if let Some(id) = existing {
              return Ok(id);
            }
            Ok(conn.query_row(
              "INSERT INTO dim_company (name) VALUES (?1)
               ON CONFLICT (name) DO UPDATE SET name = excluded.name
               RETURNING company_id",
              rusqlite::params![n],
              |row| row.get(0),
            )?)
          })
          .await?;
        Ok::<_, crate::Error>(id)
      })
      .await
  }

  async fn time_id(&self, date: NaiveDate) -> Result<Option<i64>> {
    Ok(self.time_ids(BTreeSet::from([date])).await?.remove(&date))
  }

  async fn save_records(&self, records: &[NormalizedRecord]) -> Result<SaveSummary> {
    let mut summary = SaveSummary::default();
    if records.is_empty() {
      return Ok(summary);
    }

    let time_ids = self
      .time_ids(records.iter().map(|r| r.incident_date).collect())
      .await?;

    let mut pending = Vec::with_capacity(records.len());
    for record in records {
      let Some(&time_id) = time_ids.get(&record.incident_date) else {
        tracing::warn!(
          content_id = %record.content_id,
          date = %record.incident_date,
          "no time dimension row for incident date, skipping record"
        );
        summary.skipped_missing_time += 1;
        continue;
      };
      let geography_id = self
        .get_or_create_geography(&record.region, &record.comuna)
        .await?;
      let company_id = self.get_or_create_company(&record.company).await?;
      pending.push(PendingFact::new(record, geography_id, company_id, time_id));
    }

    let attempted = pending.len();
    if attempted > 0 {
      summary.inserted = self.insert_facts(pending).await?;
    }
    summary.duplicates = attempted - summary.inserted;

    tracing::debug!(
      inserted = summary.inserted,
      duplicates = summary.duplicates,
      skipped = summary.skipped_missing_time,
      "batch saved"
    );
    Ok(summary)
  }
}
