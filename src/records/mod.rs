//! Turning live readings into labeled records, and editing them.

pub mod commands;

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Local, TimeZone, Timelike, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::db::WeightRecord;
use crate::serial::CurrentReading;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RecordError {
    #[error("please enter a category")]
    EmptyCategory,
    #[error("weight must be a finite number, got {0}")]
    InvalidWeight(f64),
    #[error("saving needs a connected scale")]
    NotConnected,
}

fn validate(weight: f64, category: &str) -> Result<String, RecordError> {
    let category = category.trim();
    if category.is_empty() {
        return Err(RecordError::EmptyCategory);
    }
    if !weight.is_finite() {
        return Err(RecordError::InvalidWeight(weight));
    }
    Ok(category.to_string())
}

/// Snapshots `reading` under `category`, captured at `now`.
pub fn new_record(
    reading: &CurrentReading,
    category: &str,
    now: DateTime<Utc>,
) -> Result<WeightRecord, RecordError> {
    let category = validate(reading.weight, category)?;
    Ok(WeightRecord {
        id: Uuid::new_v4().to_string(),
        weight: reading.weight,
        category,
        timestamp: now.timestamp_millis(),
        date: display_date(&now.with_timezone(&Local)),
    })
}

/// Full replace of weight, category and display date; id and capture
/// timestamp stay as they were.
pub fn apply_edit(
    record: &WeightRecord,
    weight: f64,
    category: &str,
    now: DateTime<Utc>,
) -> Result<WeightRecord, RecordError> {
    let category = validate(weight, category)?;
    Ok(WeightRecord {
        id: record.id.clone(),
        weight,
        category,
        timestamp: record.timestamp,
        date: display_date(&now.with_timezone(&Local)),
    })
}

/// Colombian-Spanish style timestamp: `19/10/2026, 3:07:09 p. m.`
pub fn display_date<Tz: TimeZone>(at: &DateTime<Tz>) -> String {
    let (is_pm, hour) = at.hour12();
    format!(
        "{}/{}/{}, {}:{:02}:{:02} {}",
        at.day(),
        at.month(),
        at.year(),
        hour,
        at.minute(),
        at.second(),
        if is_pm { "p. m." } else { "a. m." }
    )
}

pub fn export_json(records: &[WeightRecord], path: &Path) -> Result<()> {
    let serialized = serde_json::to_string_pretty(records)?;
    std::fs::write(path, serialized)
        .with_context(|| format!("Failed to write records to {}", path.display()))
}

/// Reads a record list exported by [`export_json`] or by the browser version.
pub fn read_json(path: &Path) -> Result<Vec<WeightRecord>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read records from {}", path.display()))?;
    let records: Vec<WeightRecord> = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a record list", path.display()))?;

    records
        .into_iter()
        .map(|record| {
            let category = validate(record.weight, &record.category)
                .with_context(|| format!("record {} is invalid", record.id))?;
            Ok(WeightRecord { category, ..record })
        })
        .collect()
}
