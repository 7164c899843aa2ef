use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use log::info;
use tokio::sync::Mutex;

use crate::db::{Database, WeightRecord};
use crate::events::EventBus;
use crate::records::{self, RecordError};
use crate::serial::{
    ConnectionController, ConnectionState, DeviceSession, LinkConfig, PortSelector,
};

const DB_FILE_NAME: &str = "weighlog.sqlite3";

pub struct AppState {
    pub(crate) db: Database,
    pub(crate) session: Arc<DeviceSession>,
    pub(crate) connection: Mutex<ConnectionController>,
}

impl AppState {
    /// Opens the record store under `data_dir` and wires a connection
    /// controller around `selector`.
    pub fn open(
        data_dir: &Path,
        selector: Box<dyn PortSelector>,
        link: LinkConfig,
        trace_chunks: bool,
    ) -> Result<Self> {
        let db = Database::new(data_dir.join(DB_FILE_NAME))?;

        let session = Arc::new(DeviceSession::new(EventBus::new()));
        let controller = ConnectionController::new(selector, link, Arc::clone(&session))
            .with_chunk_tracing(trace_chunks);

        Ok(Self {
            db,
            session,
            connection: Mutex::new(controller),
        })
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn connection(&self) -> &Mutex<ConnectionController> {
        &self.connection
    }

    /// Commits the current reading under `category`.
    pub async fn capture_record(&self, category: &str) -> Result<WeightRecord> {
        if self.session.state() != ConnectionState::Connected {
            return Err(RecordError::NotConnected.into());
        }

        let reading = self.session.reading();
        let record = records::new_record(&reading, category, Utc::now())?;
        self.db.insert_record(&record).await?;
        info!(
            "saved {:.2} under '{}' as {}",
            record.weight, record.category, record.id
        );
        Ok(record)
    }

    pub async fn edit_record(
        &self,
        record_id: &str,
        weight: f64,
        category: &str,
    ) -> Result<WeightRecord> {
        let current = self
            .db
            .get_record(record_id)
            .await?
            .ok_or_else(|| anyhow!("Record {record_id} not found"))?;

        let edited = records::apply_edit(&current, weight, category, Utc::now())?;
        self.db.update_record(record_id, &edited).await?;
        Ok(edited)
    }

    pub async fn list_records(&self) -> Result<Vec<WeightRecord>> {
        self.db.get_records().await
    }

    pub async fn delete_record(&self, record_id: &str) -> Result<bool> {
        self.db.delete_record(record_id).await
    }
}
