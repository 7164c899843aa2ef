use anyhow::{anyhow, Context, Result};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{connection::Database, models::WeightRecord};

const RECORD_COLUMNS: &str = "id, weight, category, timestamp, date";

fn row_to_record(row: &Row) -> rusqlite::Result<WeightRecord> {
    Ok(WeightRecord {
        id: row.get("id")?,
        weight: row.get("weight")?,
        category: row.get("category")?,
        timestamp: row.get("timestamp")?,
        date: row.get("date")?,
    })
}

impl Database {
    pub async fn insert_record(&self, record: &WeightRecord) -> Result<()> {
        let record = record.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO weight_records (id, weight, category, timestamp, date)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    record.weight,
                    record.category,
                    record.timestamp,
                    record.date,
                ],
            )
            .with_context(|| format!("failed to insert record {}", record.id))?;
            Ok(())
        })
        .await
    }

    /// All records, most recent capture first.
    pub async fn get_records(&self) -> Result<Vec<WeightRecord>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS}
                 FROM weight_records
                 ORDER BY timestamp DESC, rowid DESC"
            ))?;
            let records = stmt
                .query_map([], row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("failed to load records")?;
            Ok(records)
        })
        .await
    }

    pub async fn get_record(&self, record_id: &str) -> Result<Option<WeightRecord>> {
        let record_id = record_id.to_string();
        self.execute(move |conn| {
            let record = conn
                .query_row(
                    &format!("SELECT {RECORD_COLUMNS} FROM weight_records WHERE id = ?1"),
                    params![record_id],
                    row_to_record,
                )
                .optional()
                .with_context(|| format!("failed to load record {record_id}"))?;
            Ok(record)
        })
        .await
    }

    /// Replaces weight, category and date of `record_id`. The stored id and
    /// capture timestamp are kept regardless of what `record` carries.
    pub async fn update_record(&self, record_id: &str, record: &WeightRecord) -> Result<()> {
        let record_id = record_id.to_string();
        let record = record.clone();
        self.execute(move |conn| {
            let rows_affected = conn
                .execute(
                    "UPDATE weight_records
                     SET weight = ?1, category = ?2, date = ?3
                     WHERE id = ?4",
                    params![record.weight, record.category, record.date, record_id],
                )
                .with_context(|| format!("failed to update record {record_id}"))?;

            if rows_affected == 0 {
                return Err(anyhow!("Record {record_id} not found"));
            }
            Ok(())
        })
        .await
    }

    /// Returns whether a record was removed. Deleting an unknown id is not an
    /// error.
    pub async fn delete_record(&self, record_id: &str) -> Result<bool> {
        let record_id = record_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn
                .execute("DELETE FROM weight_records WHERE id = ?1", params![record_id])
                .with_context(|| format!("failed to delete record {record_id}"))?;
            Ok(rows_affected > 0)
        })
        .await
    }

    pub async fn clear_records(&self) -> Result<usize> {
        self.execute(|conn| {
            conn.execute("DELETE FROM weight_records", [])
                .context("failed to clear records")
        })
        .await
    }

    /// Inserts records in one transaction, skipping ids already stored.
    /// Returns how many were added.
    pub async fn import_records(&self, records: Vec<WeightRecord>) -> Result<usize> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO weight_records (id, weight, category, timestamp, date)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for record in &records {
                    inserted += stmt
                        .execute(params![
                            record.id,
                            record.weight,
                            record.category,
                            record.timestamp,
                            record.date,
                        ])
                        .with_context(|| format!("failed to import record {}", record.id))?;
                }
            }
            tx.commit().context("failed to commit import")?;
            Ok(inserted)
        })
        .await
    }
}
