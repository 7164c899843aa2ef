//! Labeled weight observation kept by the record store.

use serde::{Deserialize, Serialize};

/// One committed weight observation.
///
/// `timestamp` is the capture instant in epoch milliseconds and never changes
/// after creation; `date` is the human-readable copy refreshed on every edit.
/// The JSON shape matches the list the browser version kept in local storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WeightRecord {
    pub id: String,
    pub weight: f64,
    pub category: String,
    pub timestamp: i64,
    pub date: String,
}
